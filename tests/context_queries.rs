//! Context queries built from tagged alert rows.

use regex::Regex;
use serde_json::json;
use taegis_magic::config::ContextSection;
use taegis_magic::context::{entity_clause, literal_pattern, ContextQueryGenerator, ContextTarget};
use taegis_magic::tagger::{normalize_entities, relate_entities};
use taegis_magic::Row;

fn row(value: serde_json::Value) -> Row {
    value.as_object().unwrap().clone()
}

#[test]
fn test_literal_pattern_matches_only_the_literal() {
    for value in ["10.0.0.1", "a.b*c", "(x)|y", "C:\\Users\\bob", "^$[]{}+?"] {
        let pattern = Regex::new(&literal_pattern(value)).unwrap();
        assert!(pattern.is_match(value), "{value} should match itself");
        assert!(!pattern.is_match(&format!("{value}x")));
        assert!(!pattern.is_match(&format!("x{value}")));
    }

    let dotted = Regex::new(&literal_pattern("10.0.0.1")).unwrap();
    assert!(!dotted.is_match("10a0b0c1"));
}

#[test]
fn test_clause_quotes_embedded_quotes() {
    let clause = entity_clause("@user", "o'brien");
    assert_eq!(clause, r"@user matches_regex '^o\'brien$'");
}

/// Read a single-quoted string literal the way the query language does.
fn unquote(literal: &str) -> String {
    let inner = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .expect("quoted literal");
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            '\'' => panic!("unescaped quote in {literal}"),
            c => out.push(c),
        }
    }
    out
}

#[test]
fn test_clause_survives_quoting_and_regex() {
    let values = [
        r"C:\Users\o'brien",
        r"\\fileserver\share$",
        r"it's \'quoted\'",
        r"trailing\",
        "plain",
    ];
    for value in values {
        let clause = entity_clause("@user", value);
        let literal = clause
            .strip_prefix("@user matches_regex ")
            .expect("clause prefix");
        let pattern = Regex::new(&unquote(literal)).unwrap();

        assert!(pattern.is_match(value), "{clause} should match {value}");
        assert!(!pattern.is_match(&format!("{value}x")));
        assert!(!pattern.is_match(&format!("x{value}")));
        if value.contains('\\') {
            assert!(!pattern.is_match(&value.replace('\\', "/")));
        }
        if value.contains('\'') {
            assert!(!pattern.is_match(&value.replace('\'', "")));
        }
    }
}

#[test]
fn test_alert_rows_to_queries() {
    let alerts = vec![row(json!({
        "id": "alert://1",
        "metadata.title": "Suspicious login",
        "entities.entities": ["ipAddress:10.0.0.1", "hostName:web01", "userName:alice"]
    }))];

    let related = relate_entities(&normalize_entities(&alerts)).unwrap();
    assert_eq!(related.len(), 3);

    let generator = ContextQueryGenerator::new(ContextSection::default());
    let rows = generator.generate_rows(&related).unwrap();
    assert_eq!(rows.len(), 3);

    let ip_row = rows
        .iter()
        .find(|r| r["taegis_magic.entities.value"] == "10.0.0.1")
        .unwrap();
    let open = ip_row[ContextTarget::OpenAlerts.column()].as_str().unwrap();
    assert!(open.starts_with("FROM alert WHERE (@ip matches_regex"));
    assert!(open.contains("@host matches_regex '^web01$'"));
    assert!(open.contains("@user matches_regex '^alice$'"));
    assert!(open.contains("metadata.title != 'Suspicious login'"));
    for target in ContextTarget::ALL {
        assert!(ip_row.contains_key(target.column()));
    }
}

#[test]
fn test_untagged_rows_are_rejected() {
    let generator = ContextQueryGenerator::new(ContextSection::default());
    assert!(generator
        .generate_rows(&[row(json!({"id": "alert://1"}))])
        .is_err());
    assert!(generator.generate_rows(&[]).unwrap().is_empty());
}

//! Generic tabular rows
//!
//! Alert and event schemas differ per source, so results are never mapped
//! onto fixed structs. A [`Row`] is an ordered column -> JSON value map;
//! nested objects from the API are flattened into dotted column names
//! (`metadata.created_at.seconds`) while lists stay intact
//! (`entities.entities`).

use serde_json::{Map, Value};
use std::collections::HashSet;

/// One result row. Column order follows first insertion.
pub type Row = Map<String, Value>;

/// Default nesting depth flattened by [`normalize`].
pub const MAX_FLATTEN_DEPTH: usize = 3;

/// Flatten API records into rows and drop columns that are null everywhere.
pub fn normalize(records: &[Value], max_depth: usize) -> Vec<Row> {
    let rows: Vec<Row> = records
        .iter()
        .map(|record| {
            let mut row = Row::new();
            match record {
                Value::Object(map) => flatten_into(&mut row, None, map, 0, max_depth),
                other => {
                    row.insert("value".to_string(), other.clone());
                }
            }
            row
        })
        .collect();

    drop_empty_columns(rows)
}

fn flatten_into(
    row: &mut Row,
    prefix: Option<&str>,
    map: &Map<String, Value>,
    depth: usize,
    max_depth: usize,
) {
    for (key, value) in map {
        let column = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if depth < max_depth && !inner.is_empty() => {
                flatten_into(row, Some(&column), inner, depth + 1, max_depth)
            }
            _ => {
                row.insert(column, value.clone());
            }
        }
    }
}

fn drop_empty_columns(mut rows: Vec<Row>) -> Vec<Row> {
    let populated: HashSet<String> = rows
        .iter()
        .flat_map(|row| {
            row.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k.clone())
        })
        .collect();

    for row in &mut rows {
        row.retain(|k, _| populated.contains(k));
    }
    rows
}

/// All column names in first-seen order.
pub fn columns(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                out.push(key.clone());
            }
        }
    }
    out
}

pub fn has_column(rows: &[Row], column: &str) -> bool {
    rows.iter().any(|row| row.contains_key(column))
}

/// First non-null value among `candidates` for one row.
pub fn coalesce<'a>(row: &'a Row, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|c| row.get(*c))
        .find(|v| !v.is_null())
}

/// String view of a cell; numbers are rendered, other shapes are not.
pub fn cell_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric view of a cell, accepting numeric strings.
pub fn cell_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integer view of a cell, accepting numeric strings.
pub fn cell_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Tenant id column used by a result set (`tenant_id` or `tenant.id`).
pub fn tenant_column(rows: &[Row]) -> Option<&'static str> {
    ["tenant_id", "tenant.id"]
        .into_iter()
        .find(|c| has_column(rows, c))
}

/// Render rows as a markdown table, truncating long cells.
pub fn to_markdown(rows: &[Row], max_rows: usize) -> String {
    let cols = columns(rows);
    if cols.is_empty() {
        return "_No results_\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("| {} |\n", cols.join(" | ")));
    out.push_str(&format!(
        "|{}|\n",
        cols.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
    ));

    for row in rows.iter().take(max_rows) {
        let cells: Vec<String> = cols
            .iter()
            .map(|c| {
                let text = match row.get(c) {
                    None | Some(Value::Null) => String::new(),
                    Some(v) => cell_str(v).unwrap_or_else(|| v.to_string()),
                };
                escape_cell(&truncate(&text, 60))
            })
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    if rows.len() > max_rows {
        out.push_str(&format!("\n_{} more row(s) not shown_\n", rows.len() - max_rows));
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_normalize_flattens_nested_objects() {
        let records = vec![json!({
            "id": "alert://1",
            "metadata": {"title": "Bad", "created_at": {"seconds": 1700000000}},
            "entities": {"entities": ["ipAddress:10.0.0.1"]}
        })];

        let rows = normalize(&records, MAX_FLATTEN_DEPTH);
        let cols = columns(&rows);
        assert_eq!(
            cols,
            vec![
                "id",
                "metadata.title",
                "metadata.created_at.seconds",
                "entities.entities"
            ]
        );
        assert!(rows[0]["entities.entities"].is_array());
    }

    #[test]
    fn test_normalize_respects_depth() {
        let records = vec![json!({"a": {"b": {"c": {"d": 1}}}})];
        let rows = normalize(&records, 1);
        assert_eq!(rows[0]["a.b"], json!({"c": {"d": 1}}));
    }

    #[test]
    fn test_normalize_drops_all_null_columns() {
        let records = vec![
            json!({"id": "1", "empty": null, "partial": null}),
            json!({"id": "2", "empty": null, "partial": "x"}),
        ];
        let rows = normalize(&records, MAX_FLATTEN_DEPTH);
        assert_eq!(columns(&rows), vec!["id", "partial"]);
    }

    #[test]
    fn test_columns_first_seen_order() {
        let rows = vec![row(json!({"b": 1, "a": 2})), row(json!({"c": 3, "a": 4}))];
        assert_eq!(columns(&rows), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_coalesce_skips_nulls() {
        let r = row(json!({"metadata.severity": null, "severity": 0.4}));
        let v = coalesce(&r, &["metadata.severity", "severity"]).unwrap();
        assert_eq!(v, &json!(0.4));
    }

    #[test]
    fn test_cell_numeric_views() {
        assert_eq!(cell_f64(&json!("0.25")), Some(0.25));
        assert_eq!(cell_i64(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(cell_i64(&json!(12.0)), Some(12));
        assert_eq!(cell_f64(&json!([1])), None);
    }

    #[test]
    fn test_tenant_column() {
        let rows = vec![row(json!({"tenant.id": "t1"}))];
        assert_eq!(tenant_column(&rows), Some("tenant.id"));
        assert_eq!(tenant_column(&[row(json!({"id": 1}))]), None);
    }

    #[test]
    fn test_markdown_escapes_and_limits() {
        let rows = vec![
            row(json!({"id": "1", "title": "a|b"})),
            row(json!({"id": "2", "title": "c"})),
        ];
        let md = to_markdown(&rows, 1);
        assert!(md.starts_with("| id | title |"));
        assert!(md.contains("a\\|b"));
        assert!(md.contains("1 more row(s) not shown"));
    }
}

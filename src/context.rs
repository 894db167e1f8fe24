//! Context query generation
//!
//! Turns related-entity rows into follow-up queries: open alerts sharing an
//! entity, resolved alerts, alerts already under investigation and raw
//! events. Entity values are matched as anchored, regex-escaped literals so
//! a value can never widen the search.

use crate::config::ContextSection;
use crate::error::{MagicError, Result};
use crate::table::{self, Row};
use crate::tagger::entities::{self, EntityField, FIELD_COLUMN, VALUE_COLUMN};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTarget {
    OpenAlerts,
    ResolvedAlerts,
    Investigations,
    Events,
}

impl ContextTarget {
    pub const ALL: [ContextTarget; 4] = [
        ContextTarget::OpenAlerts,
        ContextTarget::ResolvedAlerts,
        ContextTarget::Investigations,
        ContextTarget::Events,
    ];

    /// Column the query is written to.
    pub fn column(&self) -> &'static str {
        match self {
            ContextTarget::OpenAlerts => "taegis_magic.open_alerts_query",
            ContextTarget::ResolvedAlerts => "taegis_magic.resolved_alerts_query",
            ContextTarget::Investigations => "taegis_magic.investigations_query",
            ContextTarget::Events => "taegis_magic.events_query",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextQuery {
    pub entity_value: String,
    pub entity_type: EntityField,
    pub query: String,
    pub target: ContextTarget,
}

/// Escape a value for a single-quoted query-language string.
pub fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Anchored regex matching exactly `value`.
pub fn literal_pattern(value: &str) -> String {
    format!("^{}$", regex::escape(value))
}

/// `<field> matches_regex '<pattern>'`
pub fn entity_clause(field: &str, value: &str) -> String {
    format!("{field} matches_regex '{}'", quote(&literal_pattern(value)))
}

pub struct ContextQueryGenerator {
    windows: ContextSection,
}

impl ContextQueryGenerator {
    pub fn new(windows: ContextSection) -> Self {
        Self { windows }
    }

    /// Four queries for one entity row.
    pub fn generate(&self, row: &Row) -> Result<Vec<ContextQuery>> {
        let field_name = row
            .get(FIELD_COLUMN)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(FIELD_COLUMN))?;
        let entity_type = EntityField::from_logical(field_name).ok_or_else(|| {
            MagicError::validation(format!("unknown entity field '{field_name}'"))
        })?;
        let entity_value = row
            .get(VALUE_COLUMN)
            .and_then(table::cell_str)
            .ok_or_else(|| missing(VALUE_COLUMN))?;

        let mut clauses = vec![entity_clause(field_name, &entity_value)];
        for (column, values) in entities::related_columns(row) {
            for value in values.iter().filter_map(table::cell_str) {
                clauses.push(entity_clause(column, &value));
            }
        }
        let predicate = format!("({})", clauses.join(" OR "));
        let title = row.get("metadata.title").and_then(table::cell_str);

        Ok(ContextTarget::ALL
            .iter()
            .map(|target| ContextQuery {
                entity_value: entity_value.clone(),
                entity_type,
                query: self.render(*target, &predicate, title.as_deref()),
                target: *target,
            })
            .collect())
    }

    fn render(&self, target: ContextTarget, predicate: &str, title: Option<&str>) -> String {
        let mut parts: Vec<String> = Vec::new();
        match target {
            ContextTarget::OpenAlerts => {
                parts.push(format!("FROM alert WHERE {predicate}"));
                if let Some(title) = title {
                    parts.push(format!("AND metadata.title != '{}'", quote(title)));
                }
                parts.push("AND status = 'OPEN' AND investigation_ids IS NULL".to_string());
                push_window(&mut parts, &self.windows.open_alerts);
            }
            ContextTarget::ResolvedAlerts => {
                parts.push(format!("FROM alert WHERE {predicate} AND status != 'OPEN'"));
                push_window(&mut parts, &self.windows.resolved_alerts);
                parts.push(
                    "| aggregate count by metadata.title, entities, status, resolution_reason"
                        .to_string(),
                );
            }
            ContextTarget::Investigations => {
                parts.push(format!(
                    "FROM alert WHERE {predicate} AND investigation_ids IS NOT NULL"
                ));
                push_window(&mut parts, &self.windows.investigations);
                parts.push(
                    "| aggregate count by metadata.title, entities, investigation_ids, status"
                        .to_string(),
                );
            }
            ContextTarget::Events => {
                parts.push(format!("WHERE {predicate}"));
                push_window(&mut parts, &self.windows.events);
            }
        }
        parts.join(" ")
    }

    /// Rows with the four `taegis_magic.*_query` columns added.
    ///
    /// An empty input yields an empty output; a non-empty input without the
    /// entity columns is rejected.
    pub fn generate_rows(&self, rows: &[Row]) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        entities::require_entity_columns(rows)?;

        rows.iter()
            .map(|row| {
                let mut out = row.clone();
                for query in self.generate(row)? {
                    out.insert(query.target.column().to_string(), Value::String(query.query));
                }
                Ok(out)
            })
            .collect()
    }
}

fn push_window(parts: &mut Vec<String>, window: &str) {
    let window = window.trim();
    if !window.is_empty() {
        parts.push(window.to_string());
    }
}

fn missing(column: &str) -> MagicError {
    MagicError::validation(format!(
        "{column} column not found, run `tag --entities` first"
    ))
}

//! Epoch columns rendered as readable timestamps.

use super::TAG_PREFIX;
use crate::table::{self, Row};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Write;

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Seconds,
    Microseconds,
}

/// Alert timestamp columns (`*_at.seconds`).
pub fn alert_columns(rows: &[Row]) -> Vec<String> {
    source_columns(rows, |c| c.ends_with("_at.seconds"))
}

/// Event timestamp columns (`*_time_usec`, `*mod_time_us`).
pub fn event_columns(rows: &[Row]) -> Vec<String> {
    source_columns(rows, |c| c.ends_with("_time_usec") || c.ends_with("mod_time_us"))
}

fn source_columns(rows: &[Row], pick: impl Fn(&str) -> bool) -> Vec<String> {
    table::columns(rows)
        .into_iter()
        .filter(|c| !c.starts_with(TAG_PREFIX) && pick(c))
        .collect()
}

/// Add `taegis_magic.<column>` for every alert timestamp column.
pub fn convert_alert_timestamps(rows: &[Row], format: &str) -> Vec<Row> {
    convert(rows, &alert_columns(rows), EpochUnit::Seconds, format)
}

/// Add `taegis_magic.<column>` for every event timestamp column.
pub fn convert_event_timestamps(rows: &[Row], format: &str) -> Vec<Row> {
    convert(rows, &event_columns(rows), EpochUnit::Microseconds, format)
}

pub fn convert(rows: &[Row], columns: &[String], unit: EpochUnit, format: &str) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut out = row.clone();
            for column in columns {
                let rendered = row
                    .get(column)
                    .and_then(|v| render(v, unit, format))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string());
                out.insert(format!("{TAG_PREFIX}{column}"), Value::String(rendered));
            }
            out
        })
        .collect()
}

/// Format one epoch cell. `None` when the cell is not a usable number or
/// the format string is rejected.
pub fn render(value: &Value, unit: EpochUnit, format: &str) -> Option<String> {
    let raw = table::cell_i64(value)?;
    let at: DateTime<Utc> = match unit {
        EpochUnit::Seconds => DateTime::from_timestamp(raw, 0)?,
        EpochUnit::Microseconds => DateTime::from_timestamp_micros(raw)?,
    };

    let mut text = String::new();
    write!(text, "{}", at.format(format)).ok()?;
    Some(text)
}

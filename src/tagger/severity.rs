//! Severity scores bucketed into categories.

use super::TAG_PREFIX;
use crate::table::{self, Row};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Score columns, in order of preference.
pub const SOURCE_COLUMNS: [&str; 2] = ["metadata.severity", "severity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SeverityCategory {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityCategory {
    /// Bucket a score. Scores outside `[0, 1]` clamp to the nearest bucket;
    /// NaN has none.
    pub fn from_score(score: f64) -> Option<Self> {
        if score.is_nan() {
            return None;
        }
        Some(if score >= 0.8 {
            SeverityCategory::Critical
        } else if score >= 0.6 {
            SeverityCategory::High
        } else if score >= 0.4 {
            SeverityCategory::Medium
        } else if score >= 0.2 {
            SeverityCategory::Low
        } else {
            SeverityCategory::Informational
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityCategory::Informational => "Informational",
            SeverityCategory::Low => "Low",
            SeverityCategory::Medium => "Medium",
            SeverityCategory::High => "High",
            SeverityCategory::Critical => "Critical",
        }
    }
}

impl fmt::Display for SeverityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn round2(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Add `taegis_magic.severity` and `taegis_magic.severity_category`.
///
/// Rows without a numeric score are passed through untouched.
pub fn tag_severity(rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut out = row.clone();
            let score = table::coalesce(row, &SOURCE_COLUMNS).and_then(table::cell_f64);
            if let Some(score) = score {
                if let Some(category) = SeverityCategory::from_score(score) {
                    out.insert(format!("{TAG_PREFIX}severity"), json!(round2(score)));
                    out.insert(
                        format!("{TAG_PREFIX}severity_category"),
                        Value::String(category.as_str().to_string()),
                    );
                }
            }
            out
        })
        .collect()
}

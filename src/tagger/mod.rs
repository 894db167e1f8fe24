//! Result tagger
//!
//! Non-destructive transforms over result rows. Every derived column is
//! written under the `taegis_magic.` prefix (entity relations use the
//! `@<field>` logical-type names) and source columns are never modified.
//! Missing inputs mean nothing is added; only [`relate_entities`] insists on
//! its input shape.

pub mod entities;
pub mod severity;
pub mod timestamps;

use crate::config::TaggerSection;
use crate::table::Row;

pub use entities::{
    normalize_entities, relate_entities, relations, EntityField, EntityRelation,
};
pub use severity::{tag_severity, SeverityCategory};
pub use timestamps::{convert_alert_timestamps, convert_event_timestamps};

/// Prefix for every column the tagger derives.
pub const TAG_PREFIX: &str = "taegis_magic.";

/// Timestamps and severity for alert rows.
pub fn tag_alerts(rows: &[Row], settings: &TaggerSection) -> Vec<Row> {
    let rows = convert_alert_timestamps(rows, &settings.timestamp_format);
    tag_severity(&rows)
}

/// Timestamps for event rows.
pub fn tag_events(rows: &[Row], settings: &TaggerSection) -> Vec<Row> {
    convert_event_timestamps(rows, &settings.timestamp_format)
}

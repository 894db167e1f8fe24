//! Alert entities mapped onto query-language logical types and related to
//! each other through the alerts they share.

use crate::error::{MagicError, Result};
use crate::table::{self, Row};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Column holding `type:value` entity strings.
pub const ENTITIES_COLUMN: &str = "entities.entities";
pub const FIELD_COLUMN: &str = "taegis_magic.entities.field";
pub const VALUE_COLUMN: &str = "taegis_magic.entities.value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityField {
    Ip,
    Domain,
    Hash,
    Host,
    User,
}

const LOGICAL_TYPES: &[(EntityField, &[&str])] = &[
    (
        EntityField::Ip,
        &[
            "ipaddress",
            "sourceIpAddress",
            "ipAddress",
            "destIpAddress",
            "sourceIpGeo",
            "destIpGeo",
            "receiverIp",
            "senderIp",
            "sourceAddress",
            "targetIp",
            "targetIpAddress",
            "destAddress",
            "destinationAddress",
        ],
    ),
    (
        EntityField::Domain,
        &[
            "dnsName",
            "domainname",
            "ipDomain",
            "topPrivateIpDomain",
            "domainName",
            "queryName",
            "sourceHostnameFqdn",
            "targetHostnameFqdn",
            "uriHost",
            "domain",
        ],
    ),
    (EntityField::Hash, &["md5", "sha1", "sha256", "sha512"]),
    (
        EntityField::Host,
        &[
            "sourceHostName",
            "destHostName",
            "workstationName",
            "targetHostName",
            "hostName",
            "computerName",
        ],
    ),
    (
        EntityField::User,
        &["userName", "username", "sourceUserName", "targetUserName"],
    ),
];

impl EntityField {
    /// Logical type for a raw entity type, if it has one.
    pub fn from_entity_type(entity_type: &str) -> Option<Self> {
        LOGICAL_TYPES
            .iter()
            .find(|(_, types)| types.contains(&entity_type))
            .map(|(field, _)| *field)
    }

    pub fn from_logical(name: &str) -> Option<Self> {
        match name {
            "@ip" => Some(EntityField::Ip),
            "@domain" => Some(EntityField::Domain),
            "@hash" => Some(EntityField::Hash),
            "@host" => Some(EntityField::Host),
            "@user" => Some(EntityField::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityField::Ip => "@ip",
            EntityField::Domain => "@domain",
            EntityField::Hash => "@hash",
            EntityField::Host => "@host",
            EntityField::User => "@user",
        }
    }
}

impl fmt::Display for EntityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split `type:value` at the first colon and map the type.
pub fn parse_entity(entity: &str) -> Option<(EntityField, &str)> {
    let (entity_type, value) = entity.split_once(':')?;
    Some((EntityField::from_entity_type(entity_type)?, value))
}

/// One row per (alert, recognised entity), tagged with its logical field
/// and value.
///
/// Unknown entity types are dropped, as are repeats of the same
/// `(id, field, value)`. Rows without an entity list produce nothing.
pub fn normalize_entities(rows: &[Row]) -> Vec<Row> {
    let mut seen: HashSet<(String, EntityField, String)> = HashSet::new();
    let mut out = Vec::new();

    for row in rows {
        let Some(Value::Array(entities)) = row.get(ENTITIES_COLUMN) else {
            continue;
        };
        let id = row.get("id").and_then(table::cell_str).unwrap_or_default();

        for entity in entities.iter().filter_map(Value::as_str) {
            let Some((field, value)) = parse_entity(entity) else {
                continue;
            };
            if !seen.insert((id.clone(), field, value.to_string())) {
                continue;
            }
            let mut exploded = row.clone();
            exploded.insert(ENTITIES_COLUMN.to_string(), Value::String(entity.to_string()));
            exploded.insert(FIELD_COLUMN.to_string(), Value::String(field.as_str().to_string()));
            exploded.insert(VALUE_COLUMN.to_string(), Value::String(value.to_string()));
            out.push(exploded);
        }
    }
    out
}

pub(crate) fn require_entity_columns(rows: &[Row]) -> Result<()> {
    for column in [FIELD_COLUMN, VALUE_COLUMN] {
        if !table::has_column(rows, column) {
            return Err(MagicError::validation(format!(
                "{column} column not found, run `tag --mode entities` first"
            )));
        }
    }
    Ok(())
}

struct Occurrence {
    alert_id: String,
    field: EntityField,
    value: String,
}

fn occurrences(rows: &[Row]) -> Vec<Occurrence> {
    rows.iter()
        .filter_map(|row| {
            let field = row
                .get(FIELD_COLUMN)
                .and_then(Value::as_str)
                .and_then(EntityField::from_logical)?;
            let value = row.get(VALUE_COLUMN).and_then(table::cell_str)?;
            let alert_id = row.get("id").and_then(table::cell_str).unwrap_or_default();
            Some(Occurrence {
                alert_id,
                field,
                value,
            })
        })
        .collect()
}

/// Add one `@<field>` column per logical field holding the values that
/// share an alert with the row's entity, then keep one row per entity value.
///
/// Expects the output of [`normalize_entities`]; anything else is a
/// validation error. An empty input is returned as is.
pub fn relate_entities(rows: &[Row]) -> Result<Vec<Row>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    require_entity_columns(rows)?;

    let occurrences = occurrences(rows);
    let mut fields: Vec<EntityField> = Vec::new();
    for occ in &occurrences {
        if !fields.contains(&occ.field) {
            fields.push(occ.field);
        }
    }

    let mut seen_values = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let Some(value) = row.get(VALUE_COLUMN).and_then(table::cell_str) else {
            continue;
        };
        if !seen_values.insert(value.clone()) {
            continue;
        }

        let alerts: BTreeSet<&str> = occurrences
            .iter()
            .filter(|o| o.value == value)
            .map(|o| o.alert_id.as_str())
            .collect();

        let mut related = row.clone();
        for field in &fields {
            let mut values: Vec<Value> = Vec::new();
            for occ in occurrences.iter().filter(|o| {
                o.field == *field && o.value != value && alerts.contains(o.alert_id.as_str())
            }) {
                let candidate = Value::String(occ.value.clone());
                if !values.contains(&candidate) {
                    values.push(candidate);
                }
            }
            related.insert(field.as_str().to_string(), Value::Array(values));
        }
        out.push(related);
    }
    Ok(out)
}

/// A pair of entities observed in the same alert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityRelation {
    pub source_type: EntityField,
    pub source_value: String,
    pub related_type: EntityField,
    pub related_value: String,
}

/// Flatten the output of [`relate_entities`] into relation records.
pub fn relations(related_rows: &[Row]) -> Vec<EntityRelation> {
    let mut out = Vec::new();
    for row in related_rows {
        let Some(source_type) = row
            .get(FIELD_COLUMN)
            .and_then(Value::as_str)
            .and_then(EntityField::from_logical)
        else {
            continue;
        };
        let Some(source_value) = row.get(VALUE_COLUMN).and_then(table::cell_str) else {
            continue;
        };

        for (column, cell) in related_columns(row) {
            let Some(related_type) = EntityField::from_logical(column) else {
                continue;
            };
            for related_value in cell.iter().filter_map(table::cell_str) {
                out.push(EntityRelation {
                    source_type,
                    source_value: source_value.clone(),
                    related_type,
                    related_value,
                });
            }
        }
    }
    out
}

/// `@<field>` columns of a related row that hold value lists.
pub fn related_columns(row: &Row) -> impl Iterator<Item = (&str, &Vec<Value>)> {
    row.iter().filter_map(|(column, cell)| {
        if column.starts_with('@') {
            cell.as_array().map(|values| (column.as_str(), values))
        } else {
            None
        }
    })
}

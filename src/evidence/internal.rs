//! SQLite persistence for the evidence store.
//!
//! The file holds the whole store in one table. Every flush replaces the
//! table contents inside a single transaction.

use super::{EvidenceItem, EvidenceKind};
use crate::error::Result;
use crate::table::Row;
use rusqlite::{params, Connection};
use std::path::Path;

pub(super) fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Connection::open(path)?;
    init_schema(&db)?;
    Ok(db)
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS investigation_evidence (
            evidence_type TEXT NOT NULL,
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            investigation_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            staged_at TEXT NOT NULL,
            PRIMARY KEY (evidence_type, id, tenant_id)
        ) WITHOUT ROWID",
        [],
    )?;
    Ok(())
}

/// Type alias for evidence row data from SQLite
/// (evidence_type, id, tenant_id, investigation_id, payload, staged_at)
type EvidenceRow = (String, String, String, String, String, String);

pub(super) fn load_all(db: &Connection) -> Result<Vec<EvidenceItem>> {
    let mut stmt = db.prepare(
        "SELECT evidence_type, id, tenant_id, investigation_id, payload, staged_at
         FROM investigation_evidence
         ORDER BY tenant_id, evidence_type, id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<EvidenceRow>, _>>()?;

    rows.into_iter()
        .map(|(kind, id, tenant_id, investigation_id, payload, staged_at)| {
            let kind: EvidenceKind = kind.parse()?;
            let payload: Row = serde_json::from_str(&payload)?;
            Ok(EvidenceItem {
                kind,
                id,
                tenant_id,
                investigation_id,
                payload,
                staged_at,
            })
        })
        .collect()
}

pub(super) fn write_all<'a>(
    db: &mut Connection,
    items: impl Iterator<Item = &'a EvidenceItem>,
) -> Result<()> {
    let tx = db.transaction()?;
    tx.execute("DELETE FROM investigation_evidence", [])?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO investigation_evidence
             (evidence_type, id, tenant_id, investigation_id, payload, staged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for item in items {
            insert.execute(params![
                item.kind.as_str(),
                item.id,
                item.tenant_id,
                item.investigation_id,
                serde_json::to_string(&item.payload)?,
                item.staged_at,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

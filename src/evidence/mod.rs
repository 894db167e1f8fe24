//! Evidence store
//!
//! Alerts, events and search queries staged for an investigation, keyed by
//! tenant. `(kind, id, tenant_id)` is unique; staging an existing key keeps
//! the first copy.
//!
//! With a path the store is backed by a SQLite file and every mutation
//! rewrites it. Without one it lives in memory only.
//!
//! # Example
//!
//! ```
//! use taegis_magic::evidence::{EvidenceFilter, EvidenceKind, EvidenceStore};
//! use serde_json::json;
//!
//! let mut store = EvidenceStore::open_in_memory();
//! let rows = vec![json!({"id": "alert://1", "tenant_id": "t1"}).as_object().unwrap().clone()];
//! let changes = store.stage(EvidenceKind::Alerts, &rows, None)?;
//! assert_eq!(changes.difference, 1);
//! assert_eq!(store.show(&EvidenceFilter::default())["t1"][&EvidenceKind::Alerts].len(), 1);
//! # Ok::<(), taegis_magic::MagicError>(())
//! ```

mod internal;

use crate::error::{MagicError, Result};
use crate::table::{self, Row};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Investigation target for evidence whose investigation does not exist yet.
pub const NEW_INVESTIGATION: &str = "NEW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Alerts,
    Events,
    SearchQueries,
}

impl EvidenceKind {
    pub const ALL: [EvidenceKind; 3] = [
        EvidenceKind::Alerts,
        EvidenceKind::Events,
        EvidenceKind::SearchQueries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Alerts => "alerts",
            EvidenceKind::Events => "events",
            EvidenceKind::SearchQueries => "search_queries",
        }
    }

    /// Columns holding the item identifier, in order of preference.
    pub fn id_columns(&self) -> &'static [&'static str] {
        match self {
            EvidenceKind::Alerts => &["id"],
            EvidenceKind::Events => &["resource_id", "id"],
            EvidenceKind::SearchQueries => &["id", "query_id"],
        }
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceKind {
    type Err = MagicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alerts" | "alert" => Ok(EvidenceKind::Alerts),
            "events" | "event" => Ok(EvidenceKind::Events),
            "search_queries" | "search-queries" | "search_query" => {
                Ok(EvidenceKind::SearchQueries)
            }
            other => Err(MagicError::validation(format!(
                "unknown evidence type '{other}' (expected alerts, events or search_queries)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: EvidenceKind,
    pub id: String,
    pub tenant_id: String,
    pub investigation_id: String,
    pub payload: Row,
    /// RFC 3339
    pub staged_at: String,
}

impl EvidenceItem {
    pub fn new(
        kind: EvidenceKind,
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        investigation_id: impl Into<String>,
        payload: Row,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            tenant_id: tenant_id.into(),
            investigation_id: investigation_id.into(),
            payload,
            staged_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn key(&self) -> (EvidenceKind, String) {
        (self.kind, self.id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Stage,
    Unstage,
}

/// Counts for one kind and investigation target, before and after a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageChanges {
    pub action: ChangeAction,
    pub kind: EvidenceKind,
    pub investigation_id: String,
    pub before: usize,
    pub after: usize,
    pub difference: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceFilter {
    pub kind: Option<EvidenceKind>,
    pub tenant_id: Option<String>,
    pub investigation_id: Option<String>,
}

impl EvidenceFilter {
    fn matches(&self, item: &EvidenceItem) -> bool {
        self.kind.map_or(true, |k| k == item.kind)
            && self
                .tenant_id
                .as_deref()
                .map_or(true, |t| t == item.tenant_id)
            && self
                .investigation_id
                .as_deref()
                .map_or(true, |i| i == item.investigation_id)
    }
}

/// tenant -> kind -> items
pub type StagedEvidence = BTreeMap<String, BTreeMap<EvidenceKind, Vec<EvidenceItem>>>;

/// Identifiers staged for one tenant and investigation target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvestigationEvidence {
    pub tenant_id: String,
    pub investigation_id: String,
    pub alerts: Vec<String>,
    pub events: Vec<String>,
    pub search_queries: Vec<String>,
}

impl InvestigationEvidence {
    pub fn ids(&self, kind: EvidenceKind) -> &[String] {
        match kind {
            EvidenceKind::Alerts => &self.alerts,
            EvidenceKind::Events => &self.events,
            EvidenceKind::SearchQueries => &self.search_queries,
        }
    }

    pub fn total(&self) -> usize {
        self.alerts.len() + self.events.len() + self.search_queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

pub struct EvidenceStore {
    items: BTreeMap<String, BTreeMap<(EvidenceKind, String), EvidenceItem>>,
    db: Option<Connection>,
    path: Option<PathBuf>,
}

impl EvidenceStore {
    /// Store that is never written to disk.
    pub fn open_in_memory() -> Self {
        Self {
            items: BTreeMap::new(),
            db: None,
            path: None,
        }
    }

    /// Open (or create) a file-backed store and load its contents.
    pub fn open(path: &Path) -> Result<Self> {
        let db = internal::open(path)?;
        let mut items: BTreeMap<String, BTreeMap<_, _>> = BTreeMap::new();
        for item in internal::load_all(&db)? {
            items
                .entry(item.tenant_id.clone())
                .or_default()
                .insert(item.key(), item);
        }
        tracing::debug!(path = %path.display(), tenants = items.len(), "opened evidence store");

        Ok(Self {
            items,
            db: Some(db),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::open(p),
            None => Ok(Self::open_in_memory()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stage rows targeting a new investigation.
    pub fn stage(
        &mut self,
        kind: EvidenceKind,
        rows: &[Row],
        tenant_id: Option<&str>,
    ) -> Result<StageChanges> {
        self.stage_for(kind, rows, tenant_id, NEW_INVESTIGATION)
    }

    /// Stage rows targeting `investigation_id`.
    ///
    /// Every row is validated before anything is inserted.
    pub fn stage_for(
        &mut self,
        kind: EvidenceKind,
        rows: &[Row],
        tenant_id: Option<&str>,
        investigation_id: &str,
    ) -> Result<StageChanges> {
        let mut staged = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let id = table::coalesce(row, kind.id_columns())
                .and_then(table::cell_str)
                .ok_or_else(|| {
                    MagicError::validation(format!(
                        "row {index} has no identifier (looked for {})",
                        kind.id_columns().join(", ")
                    ))
                })?;
            let tenant = match tenant_id {
                Some(t) => t.to_string(),
                None => table::coalesce(row, &["tenant_id", "tenant.id"])
                    .and_then(table::cell_str)
                    .ok_or_else(|| {
                        MagicError::validation(format!(
                            "row {index} ({id}) has no tenant_id column and no tenant was given"
                        ))
                    })?,
            };
            staged.push(EvidenceItem::new(
                kind,
                id,
                tenant,
                investigation_id,
                row.clone(),
            ));
        }

        let before = self.count(kind, investigation_id);
        let mut added = 0;
        for item in staged {
            if self.insert(item) {
                added += 1;
            }
        }
        if added > 0 {
            self.flush()?;
        }
        let after = self.count(kind, investigation_id);
        tracing::info!(kind = %kind, added, skipped = rows.len() - added, "staged evidence");

        Ok(StageChanges {
            action: ChangeAction::Stage,
            kind,
            investigation_id: investigation_id.to_string(),
            before,
            after,
            difference: after as i64 - before as i64,
        })
    }

    /// Stage one prepared item. Returns false when the key already existed.
    pub fn stage_item(&mut self, item: EvidenceItem) -> Result<bool> {
        let inserted = self.insert(item);
        if inserted {
            self.flush()?;
        }
        Ok(inserted)
    }

    fn insert(&mut self, item: EvidenceItem) -> bool {
        let tenant = self.items.entry(item.tenant_id.clone()).or_default();
        let key = item.key();
        if tenant.contains_key(&key) {
            return false;
        }
        tenant.insert(key, item);
        true
    }

    fn count(&self, kind: EvidenceKind, investigation_id: &str) -> usize {
        self.items
            .values()
            .flat_map(BTreeMap::values)
            .filter(|i| i.kind == kind && i.investigation_id == investigation_id)
            .count()
    }

    /// Matching items grouped tenant -> kind.
    pub fn show(&self, filter: &EvidenceFilter) -> StagedEvidence {
        let mut out: StagedEvidence = BTreeMap::new();
        for item in self.items(filter) {
            out.entry(item.tenant_id.clone())
                .or_default()
                .entry(item.kind)
                .or_default()
                .push(item.clone());
        }
        out
    }

    /// Matching items in tenant, kind, id order.
    pub fn items(&self, filter: &EvidenceFilter) -> Vec<&EvidenceItem> {
        self.items
            .values()
            .flat_map(BTreeMap::values)
            .filter(|i| filter.matches(i))
            .collect()
    }

    /// Remove `(kind, id)` from every tenant.
    pub fn remove(&mut self, kind: EvidenceKind, id: &str) -> Result<usize> {
        let key = (kind, id.to_string());
        let removed = self
            .items
            .values_mut()
            .filter_map(|tenant| tenant.remove(&key))
            .count();
        if removed == 0 {
            return Err(MagicError::NotFound(format!("{kind} '{id}' is not staged")));
        }
        self.prune();
        self.flush()?;
        Ok(removed)
    }

    /// Remove the given ids targeting `investigation_id`. Absent ids are ignored.
    pub fn unstage(
        &mut self,
        kind: EvidenceKind,
        ids: &[String],
        investigation_id: &str,
    ) -> Result<StageChanges> {
        let before = self.count(kind, investigation_id);
        for tenant in self.items.values_mut() {
            tenant.retain(|(k, id), item| {
                !(*k == kind && item.investigation_id == investigation_id && ids.contains(id))
            });
        }
        self.prune();
        let after = self.count(kind, investigation_id);
        if after != before {
            self.flush()?;
        }

        Ok(StageChanges {
            action: ChangeAction::Unstage,
            kind,
            investigation_id: investigation_id.to_string(),
            before,
            after,
            difference: after as i64 - before as i64,
        })
    }

    /// Remove specific ids of one kind for one tenant and target.
    pub fn remove_ids(
        &mut self,
        tenant_id: &str,
        investigation_id: &str,
        kind: EvidenceKind,
        ids: &[String],
    ) -> Result<usize> {
        let Some(tenant) = self.items.get_mut(tenant_id) else {
            return Ok(0);
        };
        let before = tenant.len();
        tenant.retain(|(k, id), item| {
            !(*k == kind && item.investigation_id == investigation_id && ids.contains(id))
        });
        let removed = before - tenant.len();
        self.prune();
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Point items of `kind` staged for `from` at investigation `to`.
    pub fn retarget(
        &mut self,
        kind: EvidenceKind,
        tenant_id: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<usize> {
        let mut moved = 0;
        for item in self.items.values_mut().flat_map(BTreeMap::values_mut) {
            if item.kind == kind
                && item.investigation_id == from
                && tenant_id.map_or(true, |t| t == item.tenant_id)
            {
                item.investigation_id = to.to_string();
                moved += 1;
            }
        }
        if moved > 0 {
            self.flush()?;
        }
        Ok(moved)
    }

    /// Identifiers per kind staged for a tenant and investigation target.
    pub fn evidence_for(&self, tenant_id: &str, investigation_id: &str) -> InvestigationEvidence {
        let mut evidence = InvestigationEvidence {
            tenant_id: tenant_id.to_string(),
            investigation_id: investigation_id.to_string(),
            ..Default::default()
        };
        let Some(tenant) = self.items.get(tenant_id) else {
            return evidence;
        };
        for item in tenant
            .values()
            .filter(|i| i.investigation_id == investigation_id)
        {
            let ids = match item.kind {
                EvidenceKind::Alerts => &mut evidence.alerts,
                EvidenceKind::Events => &mut evidence.events,
                EvidenceKind::SearchQueries => &mut evidence.search_queries,
            };
            ids.push(item.id.clone());
        }
        evidence
    }

    /// Drop everything. Returns the number of items removed.
    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.len();
        self.items.clear();
        self.flush()?;
        Ok(removed)
    }

    /// Drop items matching a filter. Returns the number removed.
    pub fn clear_matching(&mut self, filter: &EvidenceFilter) -> Result<usize> {
        let before = self.len();
        for tenant in self.items.values_mut() {
            tenant.retain(|_, item| !filter.matches(item));
        }
        self.prune();
        let removed = before - self.len();
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    fn prune(&mut self) {
        self.items.retain(|_, tenant| !tenant.is_empty());
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(db) = self.db.as_mut() {
            internal::write_all(db, self.items.values().flat_map(BTreeMap::values))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().unwrap().clone()
    }

    fn alerts(ids: &[&str], tenant: &str) -> Vec<Row> {
        ids.iter()
            .map(|id| row(json!({"id": id, "tenant_id": tenant, "metadata.title": "x"})))
            .collect()
    }

    #[test]
    fn test_stage_is_idempotent() {
        let mut store = EvidenceStore::open_in_memory();
        let rows = alerts(&["a1", "a2"], "t1");

        let first = store.stage(EvidenceKind::Alerts, &rows, None).unwrap();
        let second = store.stage(EvidenceKind::Alerts, &rows, None).unwrap();

        assert_eq!(first.difference, 2);
        assert_eq!(second.before, 2);
        assert_eq!(second.difference, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_restage_keeps_first_copy() {
        let mut store = EvidenceStore::open_in_memory();
        store
            .stage(EvidenceKind::Alerts, &[row(json!({"id": "a1", "tenant_id": "t1", "v": 1}))], None)
            .unwrap();
        store
            .stage(EvidenceKind::Alerts, &[row(json!({"id": "a1", "tenant_id": "t1", "v": 2}))], None)
            .unwrap();

        let items = store.items(&EvidenceFilter::default());
        assert_eq!(items[0].payload["v"], json!(1));
    }

    #[test]
    fn test_show_partitions_by_tenant() {
        let mut store = EvidenceStore::open_in_memory();
        store.stage(EvidenceKind::Alerts, &alerts(&["a1"], "t1"), None).unwrap();
        store.stage(EvidenceKind::Alerts, &alerts(&["a1", "a2"], "t2"), None).unwrap();

        let shown = store.show(&EvidenceFilter::default());
        for (tenant, kinds) in &shown {
            for items in kinds.values() {
                assert!(items.iter().all(|i| &i.tenant_id == tenant));
            }
        }
        assert_eq!(shown["t1"][&EvidenceKind::Alerts].len(), 1);
        assert_eq!(shown["t2"][&EvidenceKind::Alerts].len(), 2);
    }

    #[test]
    fn test_tenant_argument_overrides_row() {
        let mut store = EvidenceStore::open_in_memory();
        store
            .stage(EvidenceKind::Alerts, &alerts(&["a1"], "t1"), Some("t9"))
            .unwrap();
        assert!(store.show(&EvidenceFilter::default()).contains_key("t9"));
    }

    #[test]
    fn test_events_use_resource_id() {
        let mut store = EvidenceStore::open_in_memory();
        let rows = vec![row(json!({"id": "ignored", "resource_id": "event://1", "tenant.id": "t1"}))];
        store.stage(EvidenceKind::Events, &rows, None).unwrap();

        let evidence = store.evidence_for("t1", NEW_INVESTIGATION);
        assert_eq!(evidence.events, vec!["event://1".to_string()]);
    }

    #[test]
    fn test_invalid_row_stages_nothing() {
        let mut store = EvidenceStore::open_in_memory();
        let mut rows = alerts(&["a1"], "t1");
        rows.push(row(json!({"tenant_id": "t1"})));

        let err = store.stage(EvidenceKind::Alerts, &rows, None).unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_missing_tenant_is_validation_error() {
        let mut store = EvidenceStore::open_in_memory();
        let err = store
            .stage(EvidenceKind::Alerts, &[row(json!({"id": "a1"}))], None)
            .unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
    }

    #[test]
    fn test_remove_absent_is_not_found() {
        let mut store = EvidenceStore::open_in_memory();
        let err = store.remove(EvidenceKind::Alerts, "nope").unwrap_err();
        assert!(matches!(err, MagicError::NotFound(_)));
    }

    #[test]
    fn test_remove_hits_every_tenant() {
        let mut store = EvidenceStore::open_in_memory();
        store.stage(EvidenceKind::Alerts, &alerts(&["a1"], "t1"), None).unwrap();
        store.stage(EvidenceKind::Alerts, &alerts(&["a1"], "t2"), None).unwrap();

        assert_eq!(store.remove(EvidenceKind::Alerts, "a1").unwrap(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unstage_reports_changes() {
        let mut store = EvidenceStore::open_in_memory();
        store
            .stage_for(EvidenceKind::Alerts, &alerts(&["a1", "a2"], "t1"), None, "inv-1")
            .unwrap();

        let changes = store
            .unstage(
                EvidenceKind::Alerts,
                &["a1".to_string(), "missing".to_string()],
                "inv-1",
            )
            .unwrap();
        assert_eq!(changes.action, ChangeAction::Unstage);
        assert_eq!((changes.before, changes.after, changes.difference), (2, 1, -1));
    }

    #[test]
    fn test_evidence_for_filters_target() {
        let mut store = EvidenceStore::open_in_memory();
        store.stage(EvidenceKind::Alerts, &alerts(&["a1"], "t1"), None).unwrap();
        store
            .stage_for(EvidenceKind::Alerts, &alerts(&["a2"], "t1"), None, "inv-1")
            .unwrap();

        assert_eq!(store.evidence_for("t1", NEW_INVESTIGATION).alerts, vec!["a1"]);
        assert_eq!(store.evidence_for("t1", "inv-1").alerts, vec!["a2"]);
        assert!(store.evidence_for("t2", "inv-1").is_empty());
    }

    #[test]
    fn test_clear_matching_by_kind() {
        let mut store = EvidenceStore::open_in_memory();
        store.stage(EvidenceKind::Alerts, &alerts(&["a1"], "t1"), None).unwrap();
        store
            .stage(
                EvidenceKind::Events,
                &[row(json!({"resource_id": "e1", "tenant_id": "t1"}))],
                None,
            )
            .unwrap();

        let filter = EvidenceFilter {
            kind: Some(EvidenceKind::Events),
            ..Default::default()
        };
        assert_eq!(store.clear_matching(&filter).unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retarget_moves_new_items() {
        let mut store = EvidenceStore::open_in_memory();
        store
            .stage(
                EvidenceKind::SearchQueries,
                &[row(json!({"id": "q-1", "tenant_id": "t1"}))],
                None,
            )
            .unwrap();

        let moved = store
            .retarget(EvidenceKind::SearchQueries, None, NEW_INVESTIGATION, "inv-7")
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(store.evidence_for("t1", "inv-7").search_queries, vec!["q-1"]);
        assert!(store.evidence_for("t1", NEW_INVESTIGATION).is_empty());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("events".parse::<EvidenceKind>().unwrap(), EvidenceKind::Events);
        assert_eq!(
            "search-queries".parse::<EvidenceKind>().unwrap(),
            EvidenceKind::SearchQueries
        );
        assert!("notes".parse::<EvidenceKind>().is_err());
    }
}

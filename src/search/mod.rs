//! Query executor
//!
//! Runs a query-language search against one platform service and returns
//! the rows with their metadata. Paging differs per service:
//!
//! - alerts: one search, then numbered parts polled until the limit
//! - events: one query, then `next` page tokens until exhausted
//! - investigations: numbered pages until the limit or the server total
//!
//! Tracked searches are staged into the evidence store as `search_queries`
//! items so they can later be attached to an investigation.

mod alerts;
pub mod attachments;
pub mod cache;
pub mod directory;
mod events;
mod investigations;

use crate::client::{Service, Transport};
use crate::config::QueriesSection;
use crate::error::{MagicError, Result};
use crate::evidence::{EvidenceItem, EvidenceKind, EvidenceStore, NEW_INVESTIGATION};
use crate::table::Row;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

pub use attachments::{download_target, get_attachment, list_attachments};
pub use directory::{lookup, DirectoryQuery};
pub use investigations::split_row_limit;

/// Limit applied to alert searches when none is given.
pub const DEFAULT_ALERT_LIMIT: usize = 10_000;
/// Upper bound for event rows.
pub const DEFAULT_EVENT_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Alerts,
    Events,
    Investigations,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Alerts => "alerts",
            SearchKind::Events => "events",
            SearchKind::Investigations => "investigations",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKind {
    type Err = MagicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alerts" => Ok(SearchKind::Alerts),
            "events" => Ok(SearchKind::Events),
            "investigations" => Ok(SearchKind::Investigations),
            other => Err(MagicError::validation(format!("unknown search kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Service name (`alerts`, `events`, `tenants`, ...)
    pub service: String,
    pub query: String,
    pub region: String,
    pub tenant_id: Option<String>,
    /// `None` when the service does not report a reliable total
    pub total_results: Option<i64>,
    pub results_returned: usize,
    pub truncated: bool,
    pub query_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub rows: Vec<Row>,
    pub metadata: SearchMetadata,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows plus updated counts, for `--append` onto an earlier result.
    pub fn extend(&mut self, other: SearchResult) {
        self.metadata.results_returned += other.rows.len();
        self.metadata.total_results = match (self.metadata.total_results, other.metadata.total_results) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        self.metadata.truncated |= other.metadata.truncated;
        self.rows.extend(other.rows);
    }
}

/// One search to run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub kind: SearchKind,
    pub query: String,
    pub limit: Option<usize>,
    /// Overrides the service's default tenant
    pub tenant_id: Option<String>,
}

impl SearchRequest {
    pub fn new(kind: SearchKind, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
            limit: None,
            tenant_id: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }
}

pub struct QueryExecutor<'s, T: Transport> {
    service: &'s Service<T>,
    caller_name: String,
    track: bool,
}

impl<'s, T: Transport> QueryExecutor<'s, T> {
    pub fn new(service: &'s Service<T>, settings: &QueriesSection) -> Self {
        Self {
            service,
            caller_name: settings.caller_name.clone(),
            track: settings.track,
        }
    }

    /// Override `queries.track` for this executor.
    pub fn with_tracking(mut self, track: bool) -> Self {
        self.track = track;
        self
    }

    pub fn tracking(&self) -> bool {
        self.track
    }

    /// Run a search. When tracking is on and a store is given, the query
    /// is staged into it.
    pub fn search(
        &self,
        request: &SearchRequest,
        store: Option<&mut EvidenceStore>,
    ) -> Result<SearchResult> {
        let tenant = request
            .tenant_id
            .as_deref()
            .or_else(|| self.service.tenant_id());
        tracing::info!(kind = %request.kind, tenant = ?tenant, "running search");

        let result = match request.kind {
            SearchKind::Alerts => alerts::search(
                self.service,
                tenant,
                &request.query,
                request.limit,
                &self.caller_name,
            )?,
            SearchKind::Events => events::search(
                self.service,
                tenant,
                &request.query,
                request.limit,
                &self.caller_name,
            )?,
            SearchKind::Investigations => {
                investigations::search(self.service, tenant, &request.query, request.limit)?
            }
        };
        tracing::info!(
            returned = result.metadata.results_returned,
            total = ?result.metadata.total_results,
            "search complete"
        );

        if self.track {
            match store {
                Some(store) => {
                    track_query(store, &result)?;
                }
                None => tracing::warn!("query tracking is on but no evidence store is open"),
            }
        }
        Ok(result)
    }
}

/// Stage a search as a `search_queries` evidence item.
///
/// Returns false when the result has no server query id or was already
/// tracked.
pub fn track_query(store: &mut EvidenceStore, result: &SearchResult) -> Result<bool> {
    let meta = &result.metadata;
    let Some(query_id) = meta.query_id.as_deref() else {
        tracing::warn!(service = %meta.service, "search returned no query id, not tracking");
        return Ok(false);
    };
    let Some(tenant_id) = meta.tenant_id.as_deref() else {
        tracing::warn!(query_id, "search has no tenant, not tracking");
        return Ok(false);
    };

    let payload = search_query_payload(
        query_id,
        tenant_id,
        &meta.query,
        meta.results_returned as i64,
        meta.total_results.unwrap_or(-1),
    );
    let inserted = store.stage_item(EvidenceItem::new(
        EvidenceKind::SearchQueries,
        query_id,
        tenant_id,
        NEW_INVESTIGATION,
        payload,
    ))?;
    if inserted {
        tracing::info!(query_id, "tracked search query");
    }
    Ok(inserted)
}

/// Payload stored for a tracked search query.
pub fn search_query_payload(
    query_id: &str,
    tenant_id: &str,
    query: &str,
    results_returned: i64,
    total_results: i64,
) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(query_id));
    row.insert("tenant_id".to_string(), json!(tenant_id));
    row.insert("query".to_string(), json!(query));
    row.insert("results_returned".to_string(), json!(results_returned));
    row.insert("total_results".to_string(), json!(total_results));
    row.insert(
        "inserted_time".to_string(),
        json!(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    );
    row
}

/// Walk `path` into a response value.
pub(crate) fn pointer<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

/// Records at `path` as a list, tolerating a missing or null node.
pub(crate) fn records_at(value: &Value, path: &[&str]) -> Vec<Value> {
    match pointer(value, path) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedTransport;

    fn queries(track: bool) -> QueriesSection {
        QueriesSection {
            track,
            ..Default::default()
        }
    }

    fn alerts_response(query_id: Option<&str>) -> Value {
        json!({
            "search_id": null,
            "status": "OK",
            "query_id": query_id,
            "alerts": {
                "total_results": 1,
                "total_parts": 1,
                "list": [{"id": "alert://1", "tenant_id": "t1", "metadata": {"severity": 0.5}}],
                "group_by": []
            }
        })
    }

    #[test]
    fn test_tracking_stages_search_query() {
        let transport = ScriptedTransport::new(vec![Ok(alerts_response(Some("q-1")))]);
        let service = Service::new(&transport, "charlie", Some("t1".to_string()));
        let mut store = EvidenceStore::open_in_memory();

        let executor = QueryExecutor::new(&service, &queries(true));
        let request = SearchRequest::new(SearchKind::Alerts, "FROM alert");
        executor.search(&request, Some(&mut store)).unwrap();

        let evidence = store.evidence_for("t1", NEW_INVESTIGATION);
        assert_eq!(evidence.search_queries, vec!["q-1".to_string()]);
        let item = &store.items(&Default::default())[0];
        assert_eq!(item.payload["query"], json!("FROM alert"));
        assert_eq!(item.payload["results_returned"], json!(1));
        assert_eq!(item.payload["total_results"], json!(1));
    }

    #[test]
    fn test_untracked_without_query_id() {
        let transport = ScriptedTransport::new(vec![Ok(alerts_response(None))]);
        let service = Service::new(&transport, "charlie", Some("t1".to_string()));
        let mut store = EvidenceStore::open_in_memory();

        let executor = QueryExecutor::new(&service, &queries(false)).with_tracking(true);
        executor
            .search(&SearchRequest::new(SearchKind::Alerts, "FROM alert"), Some(&mut store))
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_tracking_off_leaves_store_alone() {
        let transport = ScriptedTransport::new(vec![Ok(alerts_response(Some("q-1")))]);
        let service = Service::new(&transport, "charlie", Some("t1".to_string()));
        let mut store = EvidenceStore::open_in_memory();

        QueryExecutor::new(&service, &queries(false))
            .search(&SearchRequest::new(SearchKind::Alerts, "FROM alert"), Some(&mut store))
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_remote_error_propagates() {
        let transport = ScriptedTransport::new(vec![Err(MagicError::remote("bad cql"))]);
        let service = Service::new(&transport, "charlie", None);
        let err = QueryExecutor::new(&service, &queries(false))
            .search(&SearchRequest::new(SearchKind::Investigations, "x"), None)
            .unwrap_err();
        assert!(matches!(err, MagicError::Remote(_)));
    }

    #[test]
    fn test_extend_merges_counts() {
        let meta = SearchMetadata {
            service: "alerts".into(),
            query: "q".into(),
            region: "charlie".into(),
            tenant_id: None,
            total_results: Some(2),
            results_returned: 1,
            truncated: false,
            query_id: None,
            status: "OK".into(),
        };
        let row = json!({"id": 1}).as_object().unwrap().clone();
        let mut a = SearchResult {
            rows: vec![row.clone()],
            metadata: meta.clone(),
        };
        a.extend(SearchResult {
            rows: vec![row],
            metadata: SearchMetadata {
                total_results: None,
                ..meta
            },
        });
        assert_eq!(a.rows.len(), 2);
        assert_eq!(a.metadata.results_returned, 2);
        assert_eq!(a.metadata.total_results, None);
    }
}

//! Event query with page tokens.

use super::{records_at, SearchMetadata, SearchResult, DEFAULT_EVENT_LIMIT};
use crate::client::{Service, Transport};
use crate::error::Result;
use crate::table::{self, MAX_FLATTEN_DEPTH};
use serde_json::{json, Value};

const QUERY_ENDPOINT: &str = "eventQuery";
const PAGE_ENDPOINT: &str = "eventPage";
const PAGE_SIZE: usize = 1000;

const EVENT_RESULT_FIELDS: &str = r#"
    query { id }
    result { id type status reason rows }
    next
"#;

fn query_document() -> String {
    format!(
        "query eventQuery($query: String!, $metadata: JSONObject, $options: EventQueryOptions) {{ eventQuery(query: $query, metadata: $metadata, options: $options) {{ {EVENT_RESULT_FIELDS} }} }}"
    )
}

fn page_document() -> String {
    format!("query eventPage($pageId: String!) {{ eventPage(pageId: $pageId) {{ {EVENT_RESULT_FIELDS} }} }}")
}

/// The next page token may sit on any of the returned result blocks.
fn next_page(blocks: &[Value]) -> Option<String> {
    blocks
        .iter()
        .filter_map(|b| b.get("next").and_then(Value::as_str))
        .find(|n| !n.is_empty())
        .map(str::to_string)
}

pub(super) fn search<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    query: &str,
    limit: Option<usize>,
    caller_name: &str,
) -> Result<SearchResult> {
    let limit = limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let first = service.execute_for(
        tenant_id,
        QUERY_ENDPOINT,
        &query_document(),
        json!({
            "query": query,
            "metadata": {"callerName": caller_name},
            "options": {
                "timestampAscending": true,
                "pageSize": PAGE_SIZE.min(limit),
                "maxRows": limit,
                "skipCache": true,
                "aggregationOff": false,
            }
        }),
    )?;

    let mut blocks = records_at(&first, &[]);
    let query_id = blocks
        .iter()
        .find_map(|b| b.get("query").and_then(|q| q.get("id")).and_then(table::cell_str));
    let status = blocks
        .iter()
        .find_map(|b| b.get("result").and_then(|r| r.get("status")).and_then(table::cell_str))
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let mut records: Vec<Value> = Vec::new();
    let mut next = next_page(&blocks);
    loop {
        for block in &blocks {
            records.extend(records_at(block, &["result", "rows"]));
        }
        let Some(token) = next.take() else { break };
        if records.len() >= limit {
            break;
        }
        tracing::debug!(page = %token, "fetching event page");
        let page = service.execute_for(
            tenant_id,
            PAGE_ENDPOINT,
            &page_document(),
            json!({"pageId": token}),
        )?;
        blocks = records_at(&page, &[]);
        next = next_page(&blocks);
    }

    let truncated = records.len() > limit;
    records.truncate(limit);
    let rows = table::normalize(&records, MAX_FLATTEN_DEPTH);

    Ok(SearchResult {
        metadata: SearchMetadata {
            service: "events".to_string(),
            query: query.to_string(),
            region: service.region().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            total_results: None,
            results_returned: rows.len(),
            truncated,
            query_id,
            status,
        },
        rows,
    })
}

//! Alerts service search and part polling.

use super::{records_at, SearchMetadata, SearchResult, DEFAULT_ALERT_LIMIT};
use crate::client::{Service, Transport};
use crate::error::Result;
use crate::table::{self, Row, MAX_FLATTEN_DEPTH};
use serde_json::{json, Value};

const SEARCH_ENDPOINT: &str = "alertsServiceSearch";
const POLL_ENDPOINT: &str = "alertsServicePoll";

const ALERTS_RESPONSE_FIELDS: &str = r#"
    search_id
    status
    reason
    query_id
    alerts {
        total_results
        total_parts
        list {
            id
            tenant_id
            status
            suppressed
            resolution_reason
            investigation_ids { id }
            sensor_types
            metadata {
                title
                description
                confidence
                severity
                creator { detector { detector_id detector_name } rule { rule_id rule_name } }
                created_at { seconds }
                inserted_at { seconds }
                began_at { seconds }
                ended_at { seconds }
            }
            entities { entities }
            event_ids { id }
        }
        group_by { keys { key value } value }
    }
"#;

fn search_document() -> String {
    format!(
        "query alertsServiceSearch($in: SearchRequestInput!) {{ alertsServiceSearch(in: $in) {{ {ALERTS_RESPONSE_FIELDS} }} }}"
    )
}

fn poll_document() -> String {
    format!(
        "query alertsServicePoll($in: PollRequestInput!) {{ alertsServicePoll(in: $in) {{ {ALERTS_RESPONSE_FIELDS} }} }}"
    )
}

pub(super) fn search<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    query: &str,
    limit: Option<usize>,
    caller_name: &str,
) -> Result<SearchResult> {
    let aggregate = query.contains("aggregate");
    let limit = if aggregate {
        1
    } else {
        limit.unwrap_or(DEFAULT_ALERT_LIMIT)
    };

    let first = service.execute_for(
        tenant_id,
        SEARCH_ENDPOINT,
        &search_document(),
        json!({
            "in": {
                "cql_query": query,
                "offset": 0,
                "limit": limit,
                "metadata": {"callerName": caller_name},
            }
        }),
    )?;

    let group_by = records_at(&first, &["alerts", "group_by"]);
    let mut records = records_at(&first, &["alerts", "list"]);

    if group_by.is_empty() {
        let search_id = first.get("search_id").and_then(table::cell_str);
        let total_parts = first
            .get("alerts")
            .and_then(|a| a.get("total_parts"))
            .and_then(table::cell_i64)
            .unwrap_or(1);

        if let Some(search_id) = search_id.filter(|s| !s.is_empty()) {
            for part in 2..=total_parts {
                if records.len() >= limit {
                    break;
                }
                tracing::debug!(search_id = %search_id, part, "polling alert results");
                let response = service.execute_for(
                    tenant_id,
                    POLL_ENDPOINT,
                    &poll_document(),
                    json!({"in": {"search_id": search_id, "part_id": part}}),
                );
                match response {
                    Ok(page) => records.extend(records_at(&page, &["alerts", "list"])),
                    Err(e) => {
                        tracing::error!(search_id = %search_id, part, "cannot retrieve results: {e}");
                        if e.to_string().contains("not found") {
                            break;
                        }
                    }
                }
            }
        }
    }

    let rows = if group_by.is_empty() {
        table::normalize(&records, MAX_FLATTEN_DEPTH)
    } else {
        aggregate_rows(&group_by)
    };

    let total_results = first
        .get("alerts")
        .and_then(|a| a.get("total_results"))
        .and_then(table::cell_i64)
        .unwrap_or(0);
    let returned = rows.len();

    Ok(SearchResult {
        metadata: SearchMetadata {
            service: "alerts".to_string(),
            query: query.to_string(),
            region: service.region().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            total_results: Some(total_results),
            results_returned: returned,
            truncated: group_by.is_empty() && (returned as i64) < total_results,
            query_id: first
                .get("query_id")
                .and_then(table::cell_str)
                .filter(|s| !s.is_empty()),
            status: first
                .get("status")
                .and_then(table::cell_str)
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        },
        rows,
    })
}

/// `group_by` buckets as rows: one column per key plus `count`.
fn aggregate_rows(group_by: &[Value]) -> Vec<Row> {
    group_by
        .iter()
        .map(|bucket| {
            let mut row = Row::new();
            for key in records_at(bucket, &["keys"]) {
                if let Some(name) = key.get("key").and_then(table::cell_str) {
                    row.insert(name, key.get("value").cloned().unwrap_or(Value::Null));
                }
            }
            row.insert(
                "count".to_string(),
                bucket.get("value").cloned().unwrap_or(Value::Null),
            );
            row
        })
        .collect()
}

//! Investigations search with numbered pages.

use super::{records_at, SearchMetadata, SearchResult};
use crate::client::{Service, Transport};
use crate::error::Result;
use crate::table::{self, MAX_FLATTEN_DEPTH};
use regex::Regex;
use serde_json::{json, Value};

const ENDPOINT: &str = "investigationsV2";
const PER_PAGE: usize = 100;

const DOCUMENT: &str = r#"
query investigationsV2($arguments: InvestigationsV2Arguments!) {
    investigationsV2(arguments: $arguments) {
        totalCount
        investigations {
            id
            shortId
            tenantID
            title
            keyFindings
            priority
            type
            status
            createdAt
            updatedAt
            assignee { id name email }
            alertsEvidence { id }
            eventsEvidence { id }
        }
    }
}
"#;

/// Strip a trailing `| head N` / `| tail N` and return it as a row limit.
///
/// `tail` is not supported server side; it is treated as `head` with a
/// warning.
pub fn split_row_limit(query: &str) -> (String, Option<usize>) {
    let pattern = match Regex::new(r"\|\s*(head|tail)\s*([0-9]+)") {
        Ok(p) => p,
        Err(_) => return (query.to_string(), None),
    };
    let Some(caps) = pattern.captures(query) else {
        return (query.to_string(), None);
    };
    if &caps[1] == "tail" {
        tracing::warn!("tail is not supported, it will be used as the limit");
    }
    let limit = caps[2].parse().ok();
    let stripped = pattern.replace(query, "").trim().to_string();
    (stripped, limit)
}

pub(super) fn search<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    query: &str,
    limit: Option<usize>,
) -> Result<SearchResult> {
    let (cql, inline_limit) = split_row_limit(query);
    let limit = match (limit, inline_limit) {
        (Some(explicit), Some(_)) => {
            tracing::warn!("--limit and head/tail both given, only --limit is honored");
            Some(explicit)
        }
        (explicit, inline) => explicit.or(inline),
    };

    let per_page = limit.map_or(PER_PAGE, |l| l.min(PER_PAGE)).max(1);
    let mut page = 1;
    let fetch = |page: usize, per_page: usize| -> Result<Value> {
        service.execute_for(
            tenant_id,
            ENDPOINT,
            DOCUMENT,
            json!({"arguments": {"page": page, "perPage": per_page, "cql": cql}}),
        )
    };

    let first = fetch(page, per_page)?;
    let server_total = first.get("totalCount").and_then(table::cell_i64).unwrap_or(0);
    let mut records = records_at(&first, &["investigations"]);

    let target = match limit {
        Some(l) if (l as i64) < server_total => l,
        _ => server_total.max(0) as usize,
    };

    while records.len() < target {
        page += 1;
        let next = records_at(&fetch(page, per_page)?, &["investigations"]);
        if next.is_empty() {
            break;
        }
        records.extend(next);
    }
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    let rows = table::normalize(&records, MAX_FLATTEN_DEPTH);
    Ok(SearchResult {
        metadata: SearchMetadata {
            service: "investigations".to_string(),
            query: cql.clone(),
            region: service.region().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            total_results: Some(server_total),
            results_returned: rows.len(),
            truncated: (rows.len() as i64) < server_total,
            query_id: None,
            status: "OK".to_string(),
        },
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedTransport;

    fn page(total: i64, ids: &[&str]) -> Value {
        json!({
            "totalCount": total,
            "investigations": ids.iter().map(|id| json!({"id": id, "title": "t"})).collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_split_row_limit() {
        assert_eq!(
            split_row_limit("FROM investigation WHERE status='OPEN' | head 5"),
            ("FROM investigation WHERE status='OPEN'".to_string(), Some(5))
        );
        assert_eq!(split_row_limit("x |tail 3"), ("x".to_string(), Some(3)));
        assert_eq!(split_row_limit("x"), ("x".to_string(), None));
    }

    #[test]
    fn test_pages_until_server_total() {
        let transport = ScriptedTransport::new(vec![
            Ok(page(3, &["i1", "i2"])),
            Ok(page(3, &["i3"])),
        ]);
        let service = Service::new(&transport, "charlie", None);

        let result = search(&service, None, "status = 'OPEN'", None).unwrap();
        assert_eq!(result.rows.len(), 3);
        assert_eq!(transport.calls()[1].variables["arguments"]["page"], json!(2));
        assert!(!result.metadata.truncated);
    }

    #[test]
    fn test_head_sets_page_size() {
        let transport = ScriptedTransport::new(vec![Ok(page(50, &["i1", "i2"]))]);
        let service = Service::new(&transport, "charlie", None);

        let result = search(&service, None, "status = 'OPEN' | head 2", None).unwrap();
        let args = &transport.calls()[0].variables["arguments"];
        assert_eq!(args["perPage"], json!(2));
        assert_eq!(args["cql"], json!("status = 'OPEN'"));
        assert_eq!(result.rows.len(), 2);
        assert!(result.metadata.truncated);
    }

    #[test]
    fn test_explicit_limit_wins_over_head() {
        let transport = ScriptedTransport::new(vec![Ok(page(50, &["i1"]))]);
        let service = Service::new(&transport, "charlie", None);

        search(&service, None, "x | head 20", Some(1)).unwrap();
        assert_eq!(transport.calls()[0].variables["arguments"]["perPage"], json!(1));
    }
}

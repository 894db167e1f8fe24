//! Investigation file attachments: paged listing and single-file lookup.

use super::{pointer, records_at, SearchMetadata, SearchResult};
use crate::client::{Service, Transport};
use crate::error::{MagicError, Result};
use crate::table::{self, Row, MAX_FLATTEN_DEPTH};
use serde_json::{json, Value};

/// Files requested per `investigationFilesV2` page.
pub const FILES_PAGE_SIZE: usize = 20;

const FILES_ENDPOINT: &str = "investigationFilesV2";
const FILE_ENDPOINT: &str = "investigationFileV2";

const FILES_DOCUMENT: &str = "query investigationFilesV2($arguments: InvestigationFilesV2Arguments!) { investigationFilesV2(arguments: $arguments) { totalCount files { id name contentType size investigationId createdAt createdBy } } }";
const FILE_DOCUMENT: &str = "query investigationFileV2($arguments: InvestigationFileV2Arguments!) { investigationFileV2(arguments: $arguments) { id name contentType size investigationId createdAt createdBy downloadUrl } }";

/// Every file attached to `investigation_id`, fetched page by page.
pub fn list_attachments<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    investigation_id: &str,
) -> Result<SearchResult> {
    let tenant_id = tenant_id.or_else(|| service.tenant_id());
    let mut files = Vec::new();
    let mut total = None;
    let mut page = 1;

    loop {
        let value = service.execute_for(
            tenant_id,
            FILES_ENDPOINT,
            FILES_DOCUMENT,
            json!({"arguments": {
                "investigationId": investigation_id,
                "page": page,
                "perPage": FILES_PAGE_SIZE,
            }}),
        )?;
        let batch = records_at(&value, &["files"]);
        let count = pointer(&value, &["totalCount"]).and_then(table::cell_i64);
        total = count.or(total);
        let fetched = batch.len();
        files.extend(batch);
        tracing::debug!(page, fetched, total = ?total, "attachment page");

        let pages = total.map_or(1, |t| (t.max(0) as usize).div_ceil(FILES_PAGE_SIZE));
        if fetched < FILES_PAGE_SIZE || page >= pages {
            break;
        }
        page += 1;
    }

    Ok(attachment_result(
        service,
        tenant_id,
        format!("attachments investigation={investigation_id}"),
        &files,
        total,
    ))
}

/// Metadata of one attachment, including its download url.
pub fn get_attachment<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    file_id: &str,
) -> Result<SearchResult> {
    let tenant_id = tenant_id.or_else(|| service.tenant_id());
    let value = service.execute_for(
        tenant_id,
        FILE_ENDPOINT,
        FILE_DOCUMENT,
        json!({"arguments": {"fileId": file_id}}),
    )?;
    if value.is_null() {
        return Err(MagicError::NotFound(format!("attachment {file_id}")));
    }
    Ok(attachment_result(
        service,
        tenant_id,
        format!("attachment id={file_id}"),
        &[value],
        None,
    ))
}

/// Download url and file name from an attachment row.
pub fn download_target(row: &Row) -> Result<(String, String)> {
    let url = row
        .get("downloadUrl")
        .and_then(table::cell_str)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| MagicError::remote("attachment has no download url"))?;
    let name = row
        .get("name")
        .and_then(table::cell_str)
        .or_else(|| row.get("id").and_then(table::cell_str))
        .unwrap_or_else(|| "attachment".to_string());
    Ok((url, name))
}

fn attachment_result<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    query: String,
    files: &[Value],
    total_results: Option<i64>,
) -> SearchResult {
    let rows = table::normalize(files, MAX_FLATTEN_DEPTH);
    SearchResult {
        metadata: SearchMetadata {
            service: "investigations".to_string(),
            query,
            region: service.region().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            total_results,
            results_returned: rows.len(),
            truncated: total_results.is_some_and(|t| (rows.len() as i64) < t),
            query_id: None,
            status: "OK".to_string(),
        },
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedTransport;

    fn files(range: std::ops::Range<usize>) -> Vec<Value> {
        range
            .map(|i| json!({"id": format!("f{i}"), "name": format!("capture-{i}.pcap")}))
            .collect()
    }

    #[test]
    fn test_list_walks_every_page() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"totalCount": 45, "files": files(0..20)})),
            Ok(json!({"totalCount": 45, "files": files(20..40)})),
            Ok(json!({"totalCount": 45, "files": files(40..45)})),
        ]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));

        let result = list_attachments(&service, None, "inv-1").unwrap();

        assert_eq!(result.rows.len(), 45);
        assert_eq!(result.metadata.total_results, Some(45));
        assert!(!result.metadata.truncated);
        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].variables["arguments"]["page"], json!(3));
        assert_eq!(calls[0].variables["arguments"]["investigationId"], json!("inv-1"));
        assert!(calls.iter().all(|c| c.tenant_id.as_deref() == Some("t1")));
    }

    #[test]
    fn test_list_single_short_page() {
        let transport =
            ScriptedTransport::new(vec![Ok(json!({"totalCount": 2, "files": files(0..2)}))]);
        let service = Service::new(&transport, "charlie", None);

        let result = list_attachments(&service, Some("t9"), "inv-2").unwrap();

        assert_eq!(result.rows.len(), 2);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(result.metadata.tenant_id.as_deref(), Some("t9"));
    }

    #[test]
    fn test_get_and_download_target() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"id": "f1", "name": "notes.txt", "downloadUrl": "https://files.example/f1"})),
            Ok(Value::Null),
        ]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));

        let result = get_attachment(&service, None, "f1").unwrap();
        let (url, name) = download_target(&result.rows[0]).unwrap();
        assert_eq!(url, "https://files.example/f1");
        assert_eq!(name, "notes.txt");
        assert_eq!(transport.calls()[0].variables["arguments"]["fileId"], json!("f1"));

        assert!(matches!(
            get_attachment(&service, None, "f2").unwrap_err(),
            MagicError::NotFound(_)
        ));
    }

    #[test]
    fn test_download_target_needs_url() {
        let row = json!({"id": "f1", "downloadUrl": null}).as_object().unwrap().clone();
        assert!(download_target(&row).is_err());
    }
}

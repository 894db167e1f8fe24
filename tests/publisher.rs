//! Investigation publishing over a scripted transport.

use serde_json::json;
use taegis_magic::client::testing::ScriptedTransport;
use taegis_magic::client::Service;
use taegis_magic::evidence::{EvidenceFilter, EvidenceKind, EvidenceStore};
use taegis_magic::publisher::{InvestigationPublisher, NewInvestigation};
use taegis_magic::{MagicError, Row};

fn row(value: serde_json::Value) -> Row {
    value.as_object().unwrap().clone()
}

fn staged_store(investigation: &str) -> EvidenceStore {
    let mut store = EvidenceStore::open_in_memory();
    store
        .stage_for(
            EvidenceKind::Alerts,
            &[
                row(json!({"id": "a1", "tenant_id": "t1"})),
                row(json!({"id": "a2", "tenant_id": "t1"})),
            ],
            None,
            investigation,
        )
        .unwrap();
    store
        .stage_for(
            EvidenceKind::Events,
            &[row(json!({"resource_id": "e1", "tenant_id": "t1"}))],
            None,
            investigation,
        )
        .unwrap();
    store
}

#[test]
fn test_create_sends_staged_evidence() {
    let transport = ScriptedTransport::new(vec![Ok(json!({
        "id": "inv-42",
        "shortId": "INV00042"
    }))]);
    let service = Service::new(&transport, "charlie", Some("t1".into()));
    let store = staged_store("NEW");

    let request = NewInvestigation::new("Beaconing from web01", "## Findings\n- beacon");
    let created = InvestigationPublisher::new(&service)
        .create(&store, &request)
        .unwrap();

    assert_eq!(created.id().as_deref(), Some("inv-42"));
    assert!(!created.dry_run);
    assert_eq!(created.input["alerts"], json!(["a1", "a2"]));
    assert_eq!(created.input["events"], json!(["e1"]));
    assert_eq!(created.input["assigneeId"], "@customer");
    assert_eq!(created.input["priority"], 2);
    // Evidence stays staged until it is explicitly cleared.
    assert_eq!(store.len(), 3);
    assert_eq!(transport.calls().len(), 1);
}

#[test]
fn test_append_failure_after_progress_is_partial() {
    let transport = ScriptedTransport::new(vec![
        Ok(json!({"id": "inv-1"})),
        Err(MagicError::remote("events service unavailable")),
    ]);
    let service = Service::new(&transport, "charlie", Some("t1".into()));
    let mut store = staged_store("inv-1");

    let err = InvestigationPublisher::new(&service)
        .append(&mut store, "inv-1", None)
        .unwrap_err();

    match err {
        MagicError::PartialPublish {
            attached,
            remaining,
            ..
        } => {
            assert_eq!(attached, 2);
            assert_eq!(remaining, 1);
        }
        other => panic!("expected PartialPublish, got {other:?}"),
    }

    // Attached alerts are gone; the events are still staged for a retry.
    let left = store.items(&EvidenceFilter::default());
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].kind, EvidenceKind::Events);
}

#[test]
fn test_append_failure_before_progress_is_plain_error() {
    let transport =
        ScriptedTransport::new(vec![Err(MagicError::Authentication("token expired".into()))]);
    let service = Service::new(&transport, "charlie", Some("t1".into()));
    let mut store = staged_store("inv-1");

    let err = InvestigationPublisher::new(&service)
        .append(&mut store, "inv-1", None)
        .unwrap_err();

    assert!(err.is_authentication());
    assert_eq!(store.len(), 3);
}

#[test]
fn test_append_with_nothing_staged() {
    let transport = ScriptedTransport::new(vec![]);
    let service = Service::new(&transport, "charlie", Some("t1".into()));
    let mut store = EvidenceStore::open_in_memory();

    let report = InvestigationPublisher::new(&service)
        .append(&mut store, "inv-1", None)
        .unwrap();

    assert_eq!(report.total(), 0);
    assert!(transport.calls().is_empty());
}

#[test]
fn test_append_reads_only_the_target_tenant() {
    let transport = ScriptedTransport::new(vec![Ok(json!({})), Ok(json!({}))]);
    let service = Service::new(&transport, "charlie", Some("t1".into()));
    let mut store = staged_store("inv-1");
    store
        .stage_for(
            EvidenceKind::Alerts,
            &[row(json!({"id": "a9", "tenant_id": "t2"}))],
            None,
            "inv-1",
        )
        .unwrap();
    store
        .stage_for(
            EvidenceKind::SearchQueries,
            &[row(json!({"id": "q9", "tenant_id": "t2"}))],
            None,
            "inv-1",
        )
        .unwrap();

    let report = InvestigationPublisher::new(&service)
        .append(&mut store, "inv-1", Some("t1"))
        .unwrap();

    assert_eq!(report.tenant_id, "t1");
    assert_eq!(report.total(), 3);
    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.tenant_id.as_deref(), Some("t1"));
        let sent = call.variables.to_string();
        assert!(!sent.contains("a9") && !sent.contains("q9"), "sent t2 ids: {sent}");
        assert!(call.variables["input"].get("searchQueries").is_none());
    }

    let left = store.items(&EvidenceFilter::default());
    assert_eq!(left.len(), 2);
    assert!(left.iter().all(|item| item.tenant_id == "t2" && item.investigation_id == "inv-1"));
}

//! Investigation publisher
//!
//! Pushes staged evidence to the platform, either as a new investigation
//! (`create`, evidence targeting [`NEW_INVESTIGATION`]) or onto an existing
//! one (`append`). Every call is scoped to the target tenant and only that
//! tenant's evidence is read.
//!
//! `append` sends one call per evidence kind and clears what each
//! successful call attached, so an interrupted append can simply be re-run.

use crate::client::{Service, Transport};
use crate::error::{MagicError, Result};
use crate::evidence::{EvidenceKind, EvidenceStore, InvestigationEvidence, NEW_INVESTIGATION};
use crate::table;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

const CREATE_ENDPOINT: &str = "createInvestigationV2";
const ADD_EVIDENCE_ENDPOINT: &str = "addEvidenceToInvestigation";
const QL_QUERIES_ENDPOINT: &str = "qlQueries";
const CURRENT_SUBJECT_ENDPOINT: &str = "currentSubject";
const USERS_ENDPOINT: &str = "tdrusers";

const CREATE_DOCUMENT: &str = "mutation createInvestigationV2($input: CreateInvestigationInput!) { createInvestigationV2(input: $input) { id shortId title type status priority tenantID createdAt } }";
const ADD_EVIDENCE_DOCUMENT: &str = "mutation addEvidenceToInvestigation($input: AddEvidenceToInvestigationInput!) { addEvidenceToInvestigation(input: $input) { investigationId alerts events searchQueries } }";
const QL_QUERIES_DOCUMENT: &str =
    "query qlQueries($input: QLQueriesInput!) { qlQueries(input: $input) { queries { rn name } } }";
const CURRENT_SUBJECT_DOCUMENT: &str =
    "query currentSubject { currentSubject { id identity { __typename } } }";
const USERS_DOCUMENT: &str = "query tdrusers($email: String) { tdrusers(email: $email) { id email } }";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum InvestigationPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl InvestigationPriority {
    /// Numeric priority expected by the platform.
    pub fn level(&self) -> u8 {
        match self {
            InvestigationPriority::Low => 1,
            InvestigationPriority::Medium => 2,
            InvestigationPriority::High => 3,
            InvestigationPriority::Critical => 4,
        }
    }
}

impl fmt::Display for InvestigationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvestigationPriority::Low => "LOW",
            InvestigationPriority::Medium => "MEDIUM",
            InvestigationPriority::High => "HIGH",
            InvestigationPriority::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl FromStr for InvestigationPriority {
    type Err = MagicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" | "1" => Ok(InvestigationPriority::Low),
            "MEDIUM" | "2" => Ok(InvestigationPriority::Medium),
            "HIGH" | "3" => Ok(InvestigationPriority::High),
            "CRITICAL" | "4" => Ok(InvestigationPriority::Critical),
            other => Err(MagicError::validation(format!("unknown priority '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvestigation {
    pub title: String,
    pub key_findings: String,
    pub priority: InvestigationPriority,
    /// e.g. `SECURITY_INVESTIGATION`, `THREAT_HUNT`
    pub investigation_type: String,
    /// e.g. `OPEN`, `ACTIVE`
    pub status: String,
    /// User id, email, `@me`, `@tenant` or another `@` mention
    pub assignee_id: String,
    /// Falls back to the service's tenant
    pub tenant_id: Option<String>,
    pub dry_run: bool,
}

impl NewInvestigation {
    pub fn new(title: impl Into<String>, key_findings: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            key_findings: key_findings.into(),
            priority: InvestigationPriority::default(),
            investigation_type: "SECURITY_INVESTIGATION".to_string(),
            status: "OPEN".to_string(),
            assignee_id: "@customer".to_string(),
            tenant_id: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedInvestigation {
    pub tenant_id: String,
    /// The `CreateInvestigationInput` sent (or that would have been sent)
    pub input: Value,
    /// Platform response; `None` on a dry run
    pub investigation: Option<Value>,
    pub dry_run: bool,
}

impl CreatedInvestigation {
    pub fn id(&self) -> Option<String> {
        self.investigation
            .as_ref()
            .and_then(|i| i.get("id"))
            .and_then(table::cell_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppendReport {
    pub investigation_id: String,
    pub tenant_id: String,
    pub attached: BTreeMap<EvidenceKind, usize>,
}

impl AppendReport {
    pub fn total(&self) -> usize {
        self.attached.values().sum()
    }
}

pub struct InvestigationPublisher<'s, T: Transport> {
    service: &'s Service<T>,
}

impl<'s, T: Transport> InvestigationPublisher<'s, T> {
    pub fn new(service: &'s Service<T>) -> Self {
        Self { service }
    }

    fn tenant(&self, tenant_id: Option<&str>) -> Result<String> {
        tenant_id
            .or_else(|| self.service.tenant_id())
            .map(str::to_string)
            .ok_or_else(no_tenant)
    }

    /// Create an investigation from evidence staged for `NEW`.
    ///
    /// A dry run goes through [`preview`] and makes no calls. The store is
    /// left untouched.
    pub fn create(
        &self,
        store: &EvidenceStore,
        request: &NewInvestigation,
    ) -> Result<CreatedInvestigation> {
        if request.dry_run {
            return preview(store, request, self.service.tenant_id());
        }
        validate(request)?;
        let tenant = self.tenant(request.tenant_id.as_deref())?;
        let evidence = store.evidence_for(&tenant, NEW_INVESTIGATION);
        log_create(&tenant, &evidence, false);

        let assignee = self.resolve_assignee(&tenant, &request.assignee_id)?;
        let search_queries = self.verify_search_queries(&tenant, &evidence.search_queries)?;
        let input = create_input(request, &assignee, &evidence, &search_queries);

        let created = self.service.execute_for(
            Some(&tenant),
            CREATE_ENDPOINT,
            CREATE_DOCUMENT,
            json!({"input": input}),
        )?;
        let result = CreatedInvestigation {
            tenant_id: tenant,
            input,
            investigation: Some(created),
            dry_run: false,
        };
        tracing::info!(id = ?result.id(), "investigation created");
        Ok(result)
    }

    /// Attach evidence staged for `investigation_id`, one call per kind.
    ///
    /// Items are cleared from the store after each successful call. A
    /// failure after something was attached is reported as
    /// [`MagicError::PartialPublish`].
    pub fn append(
        &self,
        store: &mut EvidenceStore,
        investigation_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<AppendReport> {
        if investigation_id == NEW_INVESTIGATION || investigation_id.trim().is_empty() {
            return Err(MagicError::validation(
                "append needs an existing investigation id; use create for NEW evidence",
            ));
        }
        let tenant = self.tenant(tenant_id)?;
        let evidence = store.evidence_for(&tenant, investigation_id);
        let mut report = AppendReport {
            investigation_id: investigation_id.to_string(),
            tenant_id: tenant.clone(),
            attached: BTreeMap::new(),
        };
        if evidence.is_empty() {
            tracing::warn!(investigation_id, tenant = %tenant, "no evidence staged");
            return Ok(report);
        }

        for kind in EvidenceKind::ALL {
            let ids = evidence.ids(kind);
            if ids.is_empty() {
                continue;
            }
            match self.add_evidence(&tenant, investigation_id, kind, ids) {
                Ok(()) => {
                    store.remove_ids(&tenant, investigation_id, kind, ids)?;
                    tracing::info!(kind = %kind, count = ids.len(), investigation_id, "attached evidence");
                    report.attached.insert(kind, ids.len());
                }
                Err(e) => {
                    let attached = report.total();
                    if attached == 0 {
                        return Err(e);
                    }
                    return Err(MagicError::PartialPublish {
                        attached,
                        remaining: evidence.total() - attached,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(report)
    }

    fn add_evidence(
        &self,
        tenant: &str,
        investigation_id: &str,
        kind: EvidenceKind,
        ids: &[String],
    ) -> Result<()> {
        let field = match kind {
            EvidenceKind::Alerts => "alerts",
            EvidenceKind::Events => "events",
            EvidenceKind::SearchQueries => "searchQueries",
        };
        let mut input = serde_json::Map::new();
        input.insert("investigationId".to_string(), json!(investigation_id));
        input.insert(field.to_string(), json!(ids));

        self.service.execute_for(
            Some(tenant),
            ADD_EVIDENCE_ENDPOINT,
            ADD_EVIDENCE_DOCUMENT,
            json!({"input": input}),
        )?;
        Ok(())
    }

    /// Keep only search query ids the platform knows about.
    fn verify_search_queries(&self, tenant: &str, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.service.execute_for(
            Some(tenant),
            QL_QUERIES_ENDPOINT,
            QL_QUERIES_DOCUMENT,
            json!({"input": {"rns": ids}}),
        )?;
        let known: HashSet<String> = response
            .get("queries")
            .and_then(Value::as_array)
            .map(|queries| {
                queries
                    .iter()
                    .filter_map(|q| q.get("rn").and_then(table::cell_str))
                    .collect()
            })
            .unwrap_or_default();

        let (kept, dropped): (Vec<String>, Vec<String>) =
            ids.iter().cloned().partition(|id| known.contains(id));
        if !dropped.is_empty() {
            tracing::warn!(?dropped, "dropping search queries unknown to the platform");
        }
        Ok(kept)
    }

    /// Map an assignee argument to a platform assignee id.
    pub fn resolve_assignee(&self, tenant: &str, assignee: &str) -> Result<String> {
        let assignee = alias_assignee(assignee);
        if assignee == "@me" {
            let subject = self.service.execute_for(
                Some(tenant),
                CURRENT_SUBJECT_ENDPOINT,
                CURRENT_SUBJECT_DOCUMENT,
                json!({}),
            )?;
            let id = subject
                .get("id")
                .and_then(table::cell_str)
                .ok_or_else(|| MagicError::remote(format!("could not determine subject id: {subject}")))?;
            let is_client = subject
                .get("identity")
                .and_then(|i| i.get("__typename"))
                .and_then(Value::as_str)
                == Some("Client");
            return Ok(if is_client { format!("{id}@clients") } else { id });
        }

        if looks_like_email(&assignee) {
            let users = self.service.execute_for(
                Some(tenant),
                USERS_ENDPOINT,
                USERS_DOCUMENT,
                json!({"email": assignee}),
            )?;
            match users
                .as_array()
                .and_then(|u| u.first())
                .and_then(|u| u.get("id"))
                .and_then(table::cell_str)
            {
                Some(id) => return Ok(id),
                None => tracing::warn!(assignee = %assignee, "user not found, using as given"),
            }
        }
        Ok(assignee)
    }
}

/// The `CreateInvestigationInput` a create would send, built offline.
///
/// Assignee aliases are applied but not looked up, and search query ids are
/// not verified. `default_tenant` applies when the request names none.
pub fn preview(
    store: &EvidenceStore,
    request: &NewInvestigation,
    default_tenant: Option<&str>,
) -> Result<CreatedInvestigation> {
    validate(request)?;
    let tenant = request
        .tenant_id
        .as_deref()
        .or(default_tenant)
        .map(str::to_string)
        .ok_or_else(no_tenant)?;
    let evidence = store.evidence_for(&tenant, NEW_INVESTIGATION);
    log_create(&tenant, &evidence, true);

    let assignee = alias_assignee(&request.assignee_id);
    let input = create_input(request, &assignee, &evidence, &evidence.search_queries);
    Ok(CreatedInvestigation {
        tenant_id: tenant,
        input,
        investigation: None,
        dry_run: true,
    })
}

fn validate(request: &NewInvestigation) -> Result<()> {
    if request.title.trim().is_empty() {
        return Err(MagicError::validation("investigation title is empty"));
    }
    Ok(())
}

fn no_tenant() -> MagicError {
    MagicError::validation("no tenant given: pass --tenant or set defaults.tenant in the config")
}

fn log_create(tenant: &str, evidence: &InvestigationEvidence, dry_run: bool) {
    tracing::info!(
        tenant = %tenant,
        alerts = evidence.alerts.len(),
        events = evidence.events.len(),
        search_queries = evidence.search_queries.len(),
        dry_run,
        "creating investigation"
    );
}

fn create_input(
    request: &NewInvestigation,
    assignee: &str,
    evidence: &InvestigationEvidence,
    search_queries: &[String],
) -> Value {
    json!({
        "title": request.title,
        "keyFindings": request.key_findings,
        "priority": request.priority.level(),
        "type": request.investigation_type,
        "status": request.status,
        "assigneeId": assignee,
        "alerts": evidence.alerts,
        "events": evidence.events,
        "searchQueries": search_queries,
    })
}

/// Local aliases that need no lookup.
pub fn alias_assignee(assignee: &str) -> String {
    match assignee {
        "@tenant" => "@customer".to_string(),
        other => other.to_string(),
    }
}

fn looks_like_email(assignee: &str) -> bool {
    assignee.contains('@') && !assignee.starts_with('@') && !assignee.ends_with("@clients")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedTransport;
    use crate::table::Row;

    fn rows(ids: &[&str], tenant: &str) -> Vec<Row> {
        ids.iter()
            .map(|id| json!({"id": id, "tenant_id": tenant}).as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_dry_run_makes_no_calls() {
        let transport = ScriptedTransport::new(vec![]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));
        let mut store = EvidenceStore::open_in_memory();
        store.stage(EvidenceKind::Alerts, &rows(&["a1"], "t1"), None).unwrap();
        store.stage(EvidenceKind::Alerts, &rows(&["a9"], "t2"), None).unwrap();

        let mut request = NewInvestigation::new("Beaconing", "findings");
        request.assignee_id = "@tenant".into();
        request.dry_run = true;

        let created = InvestigationPublisher::new(&service).create(&store, &request).unwrap();
        assert!(transport.calls().is_empty());
        assert_eq!(created.input["alerts"], json!(["a1"]));
        assert_eq!(created.input["assigneeId"], json!("@customer"));
        assert_eq!(created.input["priority"], json!(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_preview_needs_no_service() {
        let mut store = EvidenceStore::open_in_memory();
        store.stage(EvidenceKind::Events, &rows(&["e1"], "t2"), None).unwrap();
        store
            .stage(EvidenceKind::SearchQueries, &rows(&["q-1"], "t2"), None)
            .unwrap();

        let mut request = NewInvestigation::new("Lateral movement", "findings");
        request.assignee_id = "@me".into();
        let created = preview(&store, &request, Some("t2")).unwrap();

        assert!(created.dry_run);
        assert!(created.investigation.is_none());
        assert_eq!(created.tenant_id, "t2");
        assert_eq!(created.input["events"], json!(["e1"]));
        assert_eq!(created.input["searchQueries"], json!(["q-1"]));
        assert_eq!(created.input["assigneeId"], json!("@me"));

        assert!(matches!(
            preview(&store, &request, None).unwrap_err(),
            MagicError::Validation(_)
        ));
        request.title = "  ".into();
        assert!(matches!(
            preview(&store, &request, Some("t2")).unwrap_err(),
            MagicError::Validation(_)
        ));
    }

    #[test]
    fn test_create_verifies_search_queries() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"queries": [{"rn": "q-1"}]})),
            Ok(json!({"id": "inv-1", "shortId": "INV-1"})),
        ]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));
        let mut store = EvidenceStore::open_in_memory();
        store
            .stage(EvidenceKind::SearchQueries, &rows(&["q-1", "q-2"], "t1"), None)
            .unwrap();

        let created = InvestigationPublisher::new(&service)
            .create(&store, &NewInvestigation::new("t", "k"))
            .unwrap();

        assert_eq!(transport.endpoints(), vec![QL_QUERIES_ENDPOINT, CREATE_ENDPOINT]);
        assert_eq!(created.input["searchQueries"], json!(["q-1"]));
        assert_eq!(created.id().as_deref(), Some("inv-1"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_requires_tenant() {
        let transport = ScriptedTransport::new(vec![]);
        let service = Service::new(&transport, "charlie", None);
        let store = EvidenceStore::open_in_memory();
        let err = InvestigationPublisher::new(&service)
            .create(&store, &NewInvestigation::new("t", "k"))
            .unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
    }

    #[test]
    fn test_resolve_me_for_client_subject() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "id": "sub-1",
            "identity": {"__typename": "Client"}
        }))]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));
        let id = InvestigationPublisher::new(&service)
            .resolve_assignee("t1", "@me")
            .unwrap();
        assert_eq!(id, "sub-1@clients");
    }

    #[test]
    fn test_resolve_email_lookup() {
        let transport = ScriptedTransport::new(vec![Ok(json!([{"id": "auth0|42", "email": "a@b.c"}]))]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));
        let publisher = InvestigationPublisher::new(&service);
        assert_eq!(publisher.resolve_assignee("t1", "a@b.c").unwrap(), "auth0|42");
        assert_eq!(publisher.resolve_assignee("t1", "@partner").unwrap(), "@partner");
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_append_attaches_per_kind_and_clears() {
        let transport = ScriptedTransport::new(vec![Ok(json!({})), Ok(json!({}))]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));
        let mut store = EvidenceStore::open_in_memory();
        store
            .stage_for(EvidenceKind::Alerts, &rows(&["a1", "a2"], "t1"), None, "inv-1")
            .unwrap();
        store
            .stage_for(
                EvidenceKind::Events,
                &[json!({"resource_id": "e1", "tenant_id": "t1"}).as_object().unwrap().clone()],
                None,
                "inv-1",
            )
            .unwrap();

        let report = InvestigationPublisher::new(&service)
            .append(&mut store, "inv-1", None)
            .unwrap();

        assert_eq!(report.total(), 3);
        assert!(store.is_empty());
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].variables["input"]["alerts"], json!(["a1", "a2"]));
        assert_eq!(calls[1].variables["input"]["events"], json!(["e1"]));
        assert!(calls.iter().all(|c| c.tenant_id.as_deref() == Some("t1")));
    }

    #[test]
    fn test_append_rejects_new() {
        let transport = ScriptedTransport::new(vec![]);
        let service = Service::new(&transport, "charlie", Some("t1".into()));
        let mut store = EvidenceStore::open_in_memory();
        let err = InvestigationPublisher::new(&service)
            .append(&mut store, NEW_INVESTIGATION, None)
            .unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("high".parse::<InvestigationPriority>().unwrap().level(), 3);
        assert_eq!("4".parse::<InvestigationPriority>().unwrap(), InvestigationPriority::Critical);
        assert!("urgent".parse::<InvestigationPriority>().is_err());
    }
}

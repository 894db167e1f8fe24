//! Single-call directory lookups: tenants, users, clients, rules, audits
//! and threat publications. Rules and audits can also be fetched by id.

use super::{pointer, records_at, SearchMetadata, SearchResult};
use crate::client::{Service, Transport};
use crate::error::Result;
use crate::table::{self, MAX_FLATTEN_DEPTH};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryQuery {
    Tenants { name: Option<String>, limit: usize },
    Users { email: Option<String>, limit: usize },
    CurrentUser,
    Clients { name: Option<String>, limit: usize },
    Rules { rule_type: String, limit: usize },
    Rule { id: String },
    Audits { email: Option<String>, limit: usize },
    Audit { id: String },
    ThreatLatest { size: usize },
    ThreatSearch { text: String },
    ThreatWatchlist { indicator_type: String },
}

impl DirectoryQuery {
    pub fn endpoint(&self) -> &'static str {
        match self {
            DirectoryQuery::Tenants { .. } => "tenantsv4",
            DirectoryQuery::Users { .. } => "tdrUsersSearch",
            DirectoryQuery::CurrentUser => "currentTDRUser",
            DirectoryQuery::Clients { .. } => "clients",
            DirectoryQuery::Rules { .. } => "rules",
            DirectoryQuery::Rule { .. } => "rule",
            DirectoryQuery::Audits { .. } => "allAudits",
            DirectoryQuery::Audit { .. } => "audit",
            DirectoryQuery::ThreatLatest { .. } => "threatLatestPublications",
            DirectoryQuery::ThreatSearch { .. } => "threatPublications",
            DirectoryQuery::ThreatWatchlist { .. } => "threatWatchlist",
        }
    }

    /// Service name recorded in the result metadata.
    pub fn service(&self) -> &'static str {
        match self {
            DirectoryQuery::Tenants { .. } => "tenants",
            DirectoryQuery::Users { .. } | DirectoryQuery::CurrentUser => "users",
            DirectoryQuery::Clients { .. } => "clients",
            DirectoryQuery::Rules { .. } | DirectoryQuery::Rule { .. } => "rules",
            DirectoryQuery::Audits { .. } | DirectoryQuery::Audit { .. } => "audits",
            DirectoryQuery::ThreatLatest { .. }
            | DirectoryQuery::ThreatSearch { .. }
            | DirectoryQuery::ThreatWatchlist { .. } => "threat",
        }
    }

    fn document(&self) -> &'static str {
        match self {
            DirectoryQuery::Tenants { .. } => {
                "query tenantsv4($tenantsQuery: TenantsQuery) { tenantsv4(tenantsQuery: $tenantsQuery) { totalCount results { id name created_at updated_at environments { name enabled } labels { name value } } } }"
            }
            DirectoryQuery::Users { .. } => {
                "query tdrUsersSearch($filters: TDRUsersSearchInput) { tdrUsersSearch(filters: $filters) { total_results results { id user_id email given_name family_name status last_login roles { id role_id tenant_id role_name } } } }"
            }
            DirectoryQuery::CurrentUser => {
                "query currentTDRUser { currentTDRUser { id user_id email given_name family_name status roles { id role_id tenant_id role_name } } }"
            }
            DirectoryQuery::Clients { .. } => {
                "query clients($page: Int, $perPage: Int, $name: String) { clients(page: $page, perPage: $perPage, name: $name) { id client_id name roles tenant_id created_at updated_at } }"
            }
            DirectoryQuery::Rules { .. } => {
                "query rules($ruleType: RuleType, $page: Int, $count: Int) { rules(ruleType: $ruleType, page: $page, count: $count) { id name description enabled rule_type severity create_time update_time } }"
            }
            DirectoryQuery::Rule { .. } => {
                "query rule($id: ID!) { rule(id: $id) { id name description enabled rule_type severity create_time update_time tenant_id version filters { key pattern inverted } } }"
            }
            DirectoryQuery::Audit { .. } => {
                "query audit($auditId: ID!) { audit(auditId: $auditId) { id action application email event_name tenant_id timestamp target_resource_id trace_id request_type source_ip } }"
            }
            DirectoryQuery::Audits { .. } => {
                "query allAudits($allAuditsInput: AllAuditsInput!) { allAudits(allAuditsInput: $allAuditsInput) { total_results audits { id action application email event_name tenant_id timestamp target_resource_id } } }"
            }
            DirectoryQuery::ThreatLatest { .. } => {
                "query threatLatestPublications($from: Int, $size: Int) { threatLatestPublications(from: $from, size: $size) { id name description published_time tags } }"
            }
            DirectoryQuery::ThreatSearch { .. } => {
                "query threatPublications($text: String!) { threatPublications(text: $text) { total_results publications { id name description published_time tags } } }"
            }
            DirectoryQuery::ThreatWatchlist { .. } => {
                "query threatWatchlist($indicatorType: String!) { threatWatchlist(indicatorType: $indicatorType) { indicator type severity created_at } }"
            }
        }
    }

    fn variables(&self) -> Value {
        match self {
            DirectoryQuery::Tenants { name, limit } => json!({
                "tenantsQuery": {"maxResults": limit, "nameFilter": name}
            }),
            DirectoryQuery::Users { email, limit } => json!({
                "filters": {"email": email, "perPage": limit, "page": 0}
            }),
            DirectoryQuery::CurrentUser => json!({}),
            DirectoryQuery::Clients { name, limit } => json!({
                "page": 1, "perPage": limit, "name": name
            }),
            DirectoryQuery::Rules { rule_type, limit } => json!({
                "ruleType": rule_type, "page": 0, "count": limit
            }),
            DirectoryQuery::Rule { id } => json!({"id": id}),
            DirectoryQuery::Audit { id } => json!({"auditId": id}),
            DirectoryQuery::Audits { email, limit } => json!({
                "allAuditsInput": {"offset": 0, "limit": limit, "email": email}
            }),
            DirectoryQuery::ThreatLatest { size } => json!({"from": 0, "size": size}),
            DirectoryQuery::ThreatSearch { text } => json!({"text": text}),
            DirectoryQuery::ThreatWatchlist { indicator_type } => {
                json!({"indicatorType": indicator_type})
            }
        }
    }

    /// Where the row list sits inside the endpoint value.
    fn rows_path(&self) -> &'static [&'static str] {
        match self {
            DirectoryQuery::Tenants { .. } | DirectoryQuery::Users { .. } => &["results"],
            DirectoryQuery::Audits { .. } => &["audits"],
            DirectoryQuery::ThreatSearch { .. } => &["publications"],
            _ => &[],
        }
    }

    fn total_path(&self) -> Option<&'static str> {
        match self {
            DirectoryQuery::Tenants { .. } => Some("totalCount"),
            DirectoryQuery::Users { .. }
            | DirectoryQuery::Audits { .. }
            | DirectoryQuery::ThreatSearch { .. } => Some("total_results"),
            _ => None,
        }
    }

    /// Human readable description used as the result's query text.
    pub fn describe(&self) -> String {
        match self {
            DirectoryQuery::Tenants { name, .. } => {
                format!("tenants name={}", name.as_deref().unwrap_or("*"))
            }
            DirectoryQuery::Users { email, .. } => {
                format!("users email={}", email.as_deref().unwrap_or("*"))
            }
            DirectoryQuery::CurrentUser => "current user".to_string(),
            DirectoryQuery::Clients { name, .. } => {
                format!("clients name={}", name.as_deref().unwrap_or("*"))
            }
            DirectoryQuery::Rules { rule_type, .. } => format!("rules type={rule_type}"),
            DirectoryQuery::Rule { id } => format!("rule id={id}"),
            DirectoryQuery::Audit { id } => format!("audit id={id}"),
            DirectoryQuery::Audits { email, .. } => {
                format!("audits email={}", email.as_deref().unwrap_or("*"))
            }
            DirectoryQuery::ThreatLatest { size } => format!("latest {size} publications"),
            DirectoryQuery::ThreatSearch { text } => format!("publications text={text}"),
            DirectoryQuery::ThreatWatchlist { indicator_type } => {
                format!("watchlist type={indicator_type}")
            }
        }
    }
}

/// Run one directory lookup.
pub fn lookup<T: Transport>(
    service: &Service<T>,
    tenant_id: Option<&str>,
    query: &DirectoryQuery,
) -> Result<SearchResult> {
    let tenant_id = tenant_id.or_else(|| service.tenant_id());
    let value = service.execute_for(
        tenant_id,
        query.endpoint(),
        query.document(),
        query.variables(),
    )?;

    let records = records_at(&value, query.rows_path());
    let rows = table::normalize(&records, MAX_FLATTEN_DEPTH);
    let total_results = query
        .total_path()
        .and_then(|p| pointer(&value, &[p]))
        .and_then(table::cell_i64);

    Ok(SearchResult {
        metadata: SearchMetadata {
            service: query.service().to_string(),
            query: query.describe(),
            region: service.region().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            total_results,
            results_returned: rows.len(),
            truncated: total_results.is_some_and(|t| (rows.len() as i64) < t),
            query_id: None,
            status: "OK".to_string(),
        },
        rows,
    })
}

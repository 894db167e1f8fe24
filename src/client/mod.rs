//! Platform client
//!
//! "Do X": send a GraphQL document to the platform and hand back the
//! `data.<endpoint>` value.
//!
//! - **Transport**: one request/response exchange. `HttpTransport` is the
//!   real one; `testing::ScriptedTransport` replays canned responses.
//! - **Service**: a transport bound to a region and a default tenant. Every
//!   component that talks to the platform takes a `&Service<T>`.
//!
//! # Example
//!
//! ```no_run
//! use taegis_magic::{client, config::Config};
//! use serde_json::json;
//!
//! let config = Config::default();
//! let service = client::connect(&config, Some("charlie"), None, false)?;
//! let tenants = service.execute("tenantsv4", "query { tenantsv4 { results { id } } }", json!({}))?;
//! # Ok::<(), taegis_magic::MagicError>(())
//! ```

pub mod auth;
mod internal;
pub mod testing;

use crate::config::Config;
use crate::error::Result;
use serde_json::Value;

pub use internal::{download, region_url, regions, HttpTransport, DEFAULT_REGIONS};

/// One GraphQL call.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphqlRequest {
    /// Top-level field name; its value is returned from `data`
    pub endpoint: String,
    pub document: String,
    pub variables: Value,
    /// Sent as the tenant context header when present
    pub tenant_id: Option<String>,
}

/// Sends GraphQL requests to the platform.
pub trait Transport {
    /// Execute a request and return `data.<endpoint>`.
    fn execute(&self, request: &GraphqlRequest) -> Result<Value>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(&self, request: &GraphqlRequest) -> Result<Value> {
        (**self).execute(request)
    }
}

/// A transport scoped to a region and default tenant.
pub struct Service<T: Transport> {
    transport: T,
    region: String,
    tenant_id: Option<String>,
}

impl<T: Transport> Service<T> {
    pub fn new(transport: T, region: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            transport,
            region: region.into(),
            tenant_id,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute against the default tenant.
    pub fn execute(&self, endpoint: &str, document: &str, variables: Value) -> Result<Value> {
        self.execute_for(self.tenant_id.as_deref(), endpoint, document, variables)
    }

    /// Execute against an explicit tenant.
    pub fn execute_for(
        &self,
        tenant_id: Option<&str>,
        endpoint: &str,
        document: &str,
        variables: Value,
    ) -> Result<Value> {
        tracing::debug!(endpoint, tenant = ?tenant_id, region = %self.region, "graphql call");
        self.transport.execute(&GraphqlRequest {
            endpoint: endpoint.to_string(),
            document: document.to_string(),
            variables,
            tenant_id: tenant_id.map(str::to_string),
        })
    }
}

/// Build an HTTP-backed service for a region.
///
/// `interactive` allows a masked token prompt when no credentials are found.
pub fn connect(
    config: &Config,
    region: Option<&str>,
    tenant_id: Option<&str>,
    interactive: bool,
) -> Result<Service<HttpTransport>> {
    let region = region.unwrap_or(&config.defaults.region).to_string();
    let url = region_url(config, &region)?;
    let token = auth::obtain_token(&region, &crate::paths::credentials_path(), interactive)?;
    let transport = HttpTransport::new(&url, token, &config.client)?;
    let tenant = tenant_id
        .map(str::to_string)
        .or_else(|| config.defaults.tenant.clone());
    Ok(Service::new(transport, region, tenant))
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_uses_default_tenant() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"ok": true}))]);
        let service = Service::new(&transport, "charlie", Some("t1".to_string()));

        service.execute("ping", "query { ping }", json!({})).unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tenant_id.as_deref(), Some("t1"));
        assert_eq!(calls[0].endpoint, "ping");
    }

    #[test]
    fn test_execute_for_overrides_tenant() {
        let transport = ScriptedTransport::new(vec![Ok(json!(null))]);
        let service = Service::new(&transport, "charlie", Some("t1".to_string()));

        service
            .execute_for(Some("t2"), "ping", "query { ping }", json!({}))
            .unwrap();

        assert_eq!(transport.calls()[0].tenant_id.as_deref(), Some("t2"));
    }
}

//! HTTP transport and region table.

use super::{GraphqlRequest, Transport};
use crate::config::{ClientSection, Config};
use crate::error::{MagicError, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Built-in regions: name -> API base url
pub const DEFAULT_REGIONS: &[(&str, &str)] = &[
    ("charlie", "https://api.ctpx.secureworks.com"),
    ("delta", "https://api.delta.taegis.secureworks.com"),
    ("echo", "https://api.echo.taegis.secureworks.com"),
    ("foxtrot", "https://api.foxtrot.taegis.secureworks.com"),
];

const TENANT_HEADER: &str = "X-Tenant-Context";

/// Built-in regions merged with `[regions]` from config (config wins).
pub fn regions(config: &Config) -> BTreeMap<String, String> {
    let mut all: BTreeMap<String, String> = DEFAULT_REGIONS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (name, url) in &config.regions {
        all.insert(name.clone(), url.clone());
    }
    all
}

/// Resolve a region name (or a literal `https://` url) to its API url.
pub fn region_url(config: &Config, region: &str) -> Result<String> {
    if region.starts_with("https://") || region.starts_with("http://") {
        return Ok(region.trim_end_matches('/').to_string());
    }
    regions(config)
        .remove(region)
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            MagicError::validation(format!(
                "unknown region '{region}', add it with: taegis-magic configure regions add {region} <url>"
            ))
        })
}

/// Blocking GraphQL-over-HTTP transport with retry/backoff.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    token: String,
    settings: ClientSection,
}

enum Attempt {
    Retry(String),
    Fail(MagicError),
}

impl HttpTransport {
    pub fn new(base_url: &str, token: String, settings: &ClientSection) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("taegis_magic/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MagicError::remote(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/graphql", base_url.trim_end_matches('/')),
            token,
            settings: settings.clone(),
        })
    }

    fn send_once(&self, body: &Value, tenant_id: Option<&str>) -> std::result::Result<Value, Attempt> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header("apollographql-client-name", "taegis_magic")
            .header("apollographql-client-version", env!("CARGO_PKG_VERSION"))
            .json(body);
        if let Some(tenant) = tenant_id {
            req = req.header(TENANT_HEADER, tenant);
        }

        let response = match req.send() {
            Ok(r) => r,
            Err(e) if e.is_connect() || e.is_timeout() => return Err(Attempt::Retry(e.to_string())),
            Err(e) => return Err(Attempt::Fail(e.into())),
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::Fail(MagicError::Authentication(format!(
                "platform returned {status}"
            ))));
        }
        if is_retryable(status) {
            return Err(Attempt::Retry(format!("platform returned {status}")));
        }

        let text = response
            .text()
            .map_err(|e| Attempt::Fail(e.into()))?;
        if !status.is_success() {
            return Err(Attempt::Fail(MagicError::remote(format!(
                "platform returned {status}: {}",
                text.chars().take(500).collect::<String>()
            ))));
        }

        serde_json::from_str(&text).map_err(|e| Attempt::Fail(e.into()))
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &GraphqlRequest) -> Result<Value> {
        let body = json!({
            "query": request.document,
            "variables": request.variables,
        });

        let mut attempt = 0;
        loop {
            match self.send_once(&body, request.tenant_id.as_deref()) {
                Ok(payload) => return extract_data(payload, &request.endpoint),
                Err(Attempt::Retry(reason)) if attempt < self.settings.retries => {
                    let wait = backoff(self.settings.backoff_ms, attempt);
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "retrying after: {reason}"
                    );
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(Attempt::Retry(reason)) => return Err(MagicError::Remote(reason)),
                Err(Attempt::Fail(err)) => return Err(err),
            }
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Fetch a pre-signed file url into `dest`. Returns the bytes written.
///
/// The url carries its own authorization, so no token is sent.
pub fn download(url: &str, dest: &Path, settings: &ClientSection) -> Result<u64> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(concat!("taegis_magic/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| MagicError::remote(format!("failed to create HTTP client: {e}")))?;

    let mut response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(MagicError::remote(format!("download returned {status}")));
    }

    let mut file = File::create(dest)?;
    let written = io::copy(&mut response, &mut file)?;
    file.flush()?;
    tracing::info!(path = %dest.display(), bytes = written, "downloaded file");
    Ok(written)
}

/// Exponential backoff with up to 50% jitter.
pub(crate) fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
    let jitter = if base_ms > 1 {
        fastrand::u64(0..=base_ms / 2)
    } else {
        0
    };
    Duration::from_millis(exp.saturating_add(jitter))
}

/// Pull `data.<endpoint>` out of a GraphQL response envelope.
pub(crate) fn extract_data(payload: Value, endpoint: &str) -> Result<Value> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect();
            let joined = messages.join("; ");
            let lowered = joined.to_lowercase();
            if lowered.contains("unauthorized")
                || lowered.contains("unauthenticated")
                || lowered.contains("token is expired")
            {
                return Err(MagicError::Authentication(joined));
            }
            return Err(MagicError::Remote(joined));
        }
    }

    match payload.get("data").and_then(|d| d.get(endpoint)) {
        Some(Value::Null) | None => Err(MagicError::remote(format!(
            "no rows in result set for {endpoint}"
        ))),
        Some(value) => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_url_builtin_and_config() {
        let mut config = Config::default();
        assert_eq!(
            region_url(&config, "charlie").unwrap(),
            "https://api.ctpx.secureworks.com"
        );

        config
            .regions
            .insert("lab".to_string(), "https://api.lab.example/".to_string());
        assert_eq!(region_url(&config, "lab").unwrap(), "https://api.lab.example");
    }

    #[test]
    fn test_config_region_overrides_builtin() {
        let mut config = Config::default();
        config
            .regions
            .insert("delta".to_string(), "https://proxy.internal".to_string());
        assert_eq!(region_url(&config, "delta").unwrap(), "https://proxy.internal");
    }

    #[test]
    fn test_region_url_literal() {
        let config = Config::default();
        assert_eq!(
            region_url(&config, "https://api.custom.example/").unwrap(),
            "https://api.custom.example"
        );
    }

    #[test]
    fn test_unknown_region_is_validation_error() {
        let err = region_url(&Config::default(), "zulu").unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
    }

    #[test]
    fn test_extract_data_returns_endpoint() {
        let payload = json!({"data": {"alertsServiceSearch": {"status": "OK"}}});
        let value = extract_data(payload, "alertsServiceSearch").unwrap();
        assert_eq!(value["status"], "OK");
    }

    #[test]
    fn test_extract_data_graphql_errors() {
        let payload = json!({"data": null, "errors": [{"message": "bad cql"}, {"message": "line 1"}]});
        match extract_data(payload, "x").unwrap_err() {
            MagicError::Remote(msg) => assert_eq!(msg, "bad cql; line 1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extract_data_auth_errors() {
        let payload = json!({"errors": [{"message": "Unauthorized: token is expired"}]});
        assert!(extract_data(payload, "x").unwrap_err().is_authentication());
    }

    #[test]
    fn test_extract_data_missing_endpoint() {
        let err = extract_data(json!({"data": {}}), "tenantsv4").unwrap_err();
        assert!(err.to_string().contains("no rows in result set for tenantsv4"));
    }

    #[test]
    fn test_backoff_grows_with_jitter_bound() {
        for attempt in 0..4 {
            let wait = backoff(100, attempt).as_millis() as u64;
            let floor = 100 * (1 << attempt);
            assert!(wait >= floor && wait <= floor + 50, "attempt {attempt}: {wait}");
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }
}

//! Internal implementation for the config module
//!
//! Handles `~/.taegis_magic/config.toml`. Every section is optional and
//! falls back to defaults, so a partial file is always valid.

use crate::error::{MagicError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Config Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub queries: QueriesSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub client: ClientSection,
    /// Additional or overridden regions: name -> API base url
    #[serde(default)]
    pub regions: BTreeMap<String, String>,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub tagger: TaggerSection,
    #[serde(default)]
    pub evidence: EvidenceSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Region used when `--region` is not given
    #[serde(default = "default_region")]
    pub region: String,
    /// Tenant used when `--tenant` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

fn default_region() -> String {
    "charlie".to_string()
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            region: default_region(),
            tenant: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueriesSection {
    /// Stage every alert/event search query into the evidence store
    #[serde(default)]
    pub track: bool,
    /// Sent as `metadata.callerName` with searches
    #[serde(default = "default_caller_name")]
    pub caller_name: String,
}

fn default_caller_name() -> String {
    "Taegis Magic".to_string()
}

impl Default for QueriesSection {
    fn default() -> Self {
        Self {
            track: false,
            caller_name: default_caller_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: LogLevel,
    /// Level for the platform client (HTTP/GraphQL traffic)
    #[serde(default = "default_level")]
    pub client_level: LogLevel,
}

fn default_level() -> LogLevel {
    LogLevel::Warn
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            client_level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplaySection {
    /// Do not print result rows unless `--display` is given
    #[serde(default)]
    pub suppress: bool,
    /// Directory holding display template overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Extra attempts after the first for retryable failures
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base backoff, doubled per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Lookback windows appended to generated context queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_short_window")]
    pub open_alerts: String,
    #[serde(default = "default_long_window")]
    pub resolved_alerts: String,
    #[serde(default = "default_long_window")]
    pub investigations: String,
    #[serde(default = "default_short_window")]
    pub events: String,
}

fn default_short_window() -> String {
    "EARLIEST=-1d".to_string()
}
fn default_long_window() -> String {
    "EARLIEST=-30d".to_string()
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            open_alerts: default_short_window(),
            resolved_alerts: default_long_window(),
            investigations: default_long_window(),
            events: default_short_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggerSection {
    /// chrono strftime format for converted timestamps
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

fn default_timestamp_format() -> String {
    "%Y-%m-%dT%H:%M:%SZ".to_string()
}

impl Default for TaggerSection {
    fn default() -> Self {
        Self {
            timestamp_format: default_timestamp_format(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSection {
    /// Evidence store file used when `--database` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl Config {
    pub fn template_dir(&self) -> Option<PathBuf> {
        self.display.template_dir.as_deref().map(crate::paths::expand)
    }

    pub fn evidence_database(&self) -> Option<PathBuf> {
        self.evidence.database.as_deref().map(crate::paths::expand)
    }

    /// Read a dotted key (`queries.track`, `regions.lab`) as a TOML value.
    pub fn get_value(&self, key: &str) -> Result<toml::Value> {
        let root = toml::Value::try_from(self).map_err(invalid)?;
        let mut current = &root;
        for part in key.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| MagicError::NotFound(format!("config key '{key}'")))?;
        }
        Ok(current.clone())
    }

    /// Set a dotted key from its string form.
    ///
    /// Values parse as bool, then integer, then string. When the typed form
    /// does not fit the schema (a numeric tenant id, say) the raw string is
    /// tried instead. The result replaces `self` only once it validates.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<()> {
        let root = toml::Value::try_from(&*self).map_err(invalid)?;
        let parts: Vec<&str> = key.split('.').collect();
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| MagicError::validation("empty config key"))?;

        let typed = parse_scalar(raw);
        let typed_was_string = typed.is_str();
        let parsed = with_entry(root.clone(), parents, last, typed)?
            .try_into::<Config>()
            .map_err(invalid);
        *self = match parsed {
            Ok(config) => config,
            Err(_) if !typed_was_string => {
                let as_string = toml::Value::String(raw.to_string());
                with_entry(root, parents, last, as_string)?
                    .try_into()
                    .map_err(invalid)?
            }
            Err(e) => return Err(e),
        };
        Ok(())
    }

    /// Remove a dotted key, returning whether it existed.
    pub fn unset_value(&mut self, key: &str) -> Result<bool> {
        let mut root = toml::Value::try_from(&*self).map_err(invalid)?;
        let parts: Vec<&str> = key.split('.').collect();
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| MagicError::validation("empty config key"))?;

        let mut current = &mut root;
        for part in parents {
            match current.get_mut(*part) {
                Some(next) => current = next,
                None => return Ok(false),
            }
        }
        let removed = current
            .as_table_mut()
            .map(|t| t.remove(*last).is_some())
            .unwrap_or(false);

        *self = root.try_into().map_err(invalid)?;
        Ok(removed)
    }
}

/// `root` with `parents.last` set to `value`, creating sections on the way.
fn with_entry(
    mut root: toml::Value,
    parents: &[&str],
    last: &str,
    value: toml::Value,
) -> Result<toml::Value> {
    let mut table = root
        .as_table_mut()
        .ok_or_else(|| MagicError::validation("config root is not a table"))?;
    for part in parents {
        table = table
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::map::Map::new()))
            .as_table_mut()
            .ok_or_else(|| MagicError::validation(format!("'{part}' is not a section")))?;
    }
    table.insert(last.to_string(), value);
    Ok(root)
}

fn parse_scalar(raw: &str) -> toml::Value {
    match raw {
        "true" | "yes" => toml::Value::Boolean(true),
        "false" | "no" => toml::Value::Boolean(false),
        _ => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .unwrap_or_else(|_| toml::Value::String(raw.to_string())),
    }
}

fn invalid(err: impl std::fmt::Display) -> MagicError {
    MagicError::validation(format!("invalid configuration: {err}"))
}

// =============================================================================
// Load / Save
// =============================================================================

/// Load config, returning defaults when the file does not exist.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| {
        MagicError::validation(format!("failed to parse {}: {e}", path.display()))
    })
}

pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(config).map_err(invalid)?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.region, "charlie");
        assert!(!config.queries.track);
        assert_eq!(config.queries.caller_name, "Taegis Magic");
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.context.open_alerts, "EARLIEST=-1d");
        assert_eq!(config.context.resolved_alerts, "EARLIEST=-30d");
        assert_eq!(config.tagger.timestamp_format, "%Y-%m-%dT%H:%M:%SZ");
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        let mut config = Config::default();
        config.queries.track = true;
        config
            .regions
            .insert("lab".to_string(), "https://api.lab.example".to_string());

        save(&path, &config).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_partial_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[queries]\ntrack = true\n").unwrap();

        let config = load(&path).unwrap();
        assert!(config.queries.track);
        // Other sections should have defaults
        assert_eq!(config.queries.caller_name, "Taegis Magic");
        assert_eq!(config.client.retries, 3);
    }

    #[test]
    fn test_load_rejects_bad_level() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
    }

    #[test]
    fn test_set_value_parses_scalars() {
        let mut config = Config::default();
        config.set_value("queries.track", "yes").unwrap();
        config.set_value("client.retries", "5").unwrap();
        config.set_value("logging.level", "debug").unwrap();
        config
            .set_value("regions.lab", "https://api.lab.example")
            .unwrap();

        assert!(config.queries.track);
        assert_eq!(config.client.retries, 5);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.regions["lab"], "https://api.lab.example");
    }

    #[test]
    fn test_set_value_rejects_wrong_type() {
        let mut config = Config::default();
        let err = config.set_value("client.retries", "many").unwrap_err();
        assert!(matches!(err, MagicError::Validation(_)));
        // Unchanged on failure
        assert_eq!(config.client.retries, 3);
    }

    #[test]
    fn test_set_value_numeric_strings() {
        let mut config = Config::default();
        config.set_value("defaults.tenant", "11772").unwrap();
        assert_eq!(config.defaults.tenant.as_deref(), Some("11772"));

        config.set_value("tagger.timestamp_format", "2024").unwrap();
        assert_eq!(config.tagger.timestamp_format, "2024");

        config.set_value("regions.42", "https://api.lab.example").unwrap();
        assert_eq!(config.regions["42"], "https://api.lab.example");

        // Integer settings still take integers
        config.set_value("client.retries", "7").unwrap();
        assert_eq!(config.client.retries, 7);
    }

    #[test]
    fn test_get_and_unset_value() {
        let mut config = Config::default();
        config.set_value("regions.lab", "https://x").unwrap();
        assert_eq!(
            config.get_value("regions.lab").unwrap().as_str(),
            Some("https://x")
        );

        assert!(config.unset_value("regions.lab").unwrap());
        assert!(!config.unset_value("regions.lab").unwrap());
        assert!(matches!(
            config.get_value("regions.lab"),
            Err(MagicError::NotFound(_))
        ));
    }
}

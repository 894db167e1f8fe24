//! Config module - settings for every command
//!
//! Manages `~/.taegis_magic/config.toml`: default region and tenant, query
//! tracking, logging levels, display suppression, client retry/backoff,
//! extra regions, context query windows and the evidence store location.
//!
//! The loaded [`Config`] is passed explicitly into each component; nothing
//! reads settings from global state.
//!
//! # Example
//!
//! ```no_run
//! use taegis_magic::config;
//!
//! let mut cfg = config::load_default()?;
//! cfg.set_value("queries.track", "true")?;
//! config::save_default(&cfg)?;
//! # Ok::<(), taegis_magic::MagicError>(())
//! ```

mod internal;

use crate::error::Result;
use crate::paths;
use std::path::Path;

pub use internal::{
    ClientSection, Config, ContextSection, DefaultsSection, DisplaySection, EvidenceSection,
    LogLevel, LoggingSection, QueriesSection, TaggerSection,
};

/// Load config from a specific file (defaults when missing)
pub fn load(path: &Path) -> Result<Config> {
    internal::load(path)
}

/// Load config from `paths::config_path()`
pub fn load_default() -> Result<Config> {
    internal::load(&paths::config_path())
}

/// Save config to a specific file, creating parent directories
pub fn save(path: &Path, config: &Config) -> Result<()> {
    internal::save(path, config)
}

/// Save config to `paths::config_path()`
pub fn save_default(config: &Config) -> Result<()> {
    internal::save(&paths::config_path(), config)
}

//! Single source of truth for the taegis-magic filesystem layout.
//!
//! This module defines WHERE data lives. It has no I/O, no validation,
//! no business logic.
//!
//! ```text
//! ~/.taegis_magic/
//! ├── config.toml              # Settings (see config module)
//! ├── credentials.toml         # Per-region access tokens
//! ├── results/                 # Named results (--assign NAME)
//! └── cache/
//!     └── searches/            # Cached SearchResults (--cache)
//! ```

use std::path::PathBuf;

/// Environment variable overriding the config file location.
pub const ENV_CONFIG: &str = "TAEGIS_MAGIC_CONFIG";

/// Home directory: `~/.taegis_magic/`
pub fn magic_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taegis_magic")
}

/// Config file: `$TAEGIS_MAGIC_CONFIG` or `~/.taegis_magic/config.toml`
pub fn config_path() -> PathBuf {
    std::env::var_os(ENV_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|| magic_home().join("config.toml"))
}

/// Access tokens: `~/.taegis_magic/credentials.toml`
pub fn credentials_path() -> PathBuf {
    magic_home().join("credentials.toml")
}

/// Named result sets (rebuildable)
pub mod results {
    use super::*;

    /// `~/.taegis_magic/results/`
    pub fn dir() -> PathBuf {
        magic_home().join("results")
    }

    /// `~/.taegis_magic/results/{name}.json`
    pub fn path(name: &str) -> PathBuf {
        dir().join(format!("{name}.json"))
    }
}

/// Search cache (rebuildable)
pub mod cache {
    use super::*;

    /// `~/.taegis_magic/cache/searches/`
    pub fn searches_dir() -> PathBuf {
        magic_home().join("cache").join("searches")
    }
}

/// Expand a leading `~` in a user supplied path.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

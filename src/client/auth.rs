//! Access token resolution.
//!
//! Order: `TAEGIS_ACCESS_TOKEN`, then `~/.taegis_magic/credentials.toml`
//! (one token per region), then a masked prompt when running in a terminal.

use crate::error::{MagicError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const ENV_TOKEN: &str = "TAEGIS_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub regions: BTreeMap<String, RegionCredentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCredentials {
    pub access_token: String,
}

pub fn load_credentials(path: &Path) -> Result<Credentials> {
    if !path.exists() {
        return Ok(Credentials::default());
    }
    let contents = fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| {
        MagicError::Authentication(format!("unreadable credentials file {}: {e}", path.display()))
    })
}

pub fn save_credentials(path: &Path, credentials: &Credentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(credentials)
        .map_err(|e| MagicError::validation(e.to_string()))?;
    fs::write(path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Token from the environment or the credentials file.
pub fn resolve_token(region: &str, path: &Path) -> Result<String> {
    if let Ok(token) = std::env::var(ENV_TOKEN) {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }

    load_credentials(path)?
        .regions
        .get(region)
        .map(|c| c.access_token.clone())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            MagicError::Authentication(format!(
                "no access token for region '{region}' (set {ENV_TOKEN} or run: taegis-magic configure auth --region {region})"
            ))
        })
}

/// Store a token for a region.
pub fn store_token(region: &str, token: &str, path: &Path) -> Result<()> {
    let mut credentials = load_credentials(path)?;
    credentials.regions.insert(
        region.to_string(),
        RegionCredentials {
            access_token: token.to_string(),
        },
    );
    save_credentials(path, &credentials)
}

/// Drop a stored token, returning whether one existed.
pub fn forget_token(region: &str, path: &Path) -> Result<bool> {
    let mut credentials = load_credentials(path)?;
    let removed = credentials.regions.remove(region).is_some();
    if removed {
        save_credentials(path, &credentials)?;
    }
    Ok(removed)
}

/// True when a prompt can be shown and answered.
pub fn can_prompt() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stderr)
}

/// Ask for a token with masked input and store it.
pub fn prompt_for_token(region: &str, path: &Path) -> Result<String> {
    if !can_prompt() {
        return Err(MagicError::Authentication(format!(
            "no access token for region '{region}' and no terminal to prompt on"
        )));
    }

    let term = console::Term::stderr();
    term.write_line(&format!("Access token for region '{region}':"))?;
    let token = term.read_secure_line()?;
    let token = token.trim();
    if token.is_empty() {
        return Err(MagicError::Authentication("empty access token".to_string()));
    }

    store_token(region, token, path)?;
    tracing::info!(region, "stored access token");
    Ok(token.to_string())
}

/// Resolve a token, prompting when allowed and nothing is configured.
pub fn obtain_token(region: &str, path: &Path, interactive: bool) -> Result<String> {
    match resolve_token(region, path) {
        Ok(token) => Ok(token),
        Err(MagicError::Authentication(_)) if interactive && can_prompt() => {
            prompt_for_token(region, path)
        }
        Err(e) => Err(e),
    }
}

//! On-disk cache of search results.
//!
//! Keyed by a SHA-256 of everything that shapes the result: service, query,
//! region, tenant and limit. Entries are plain JSON and never expire; delete
//! the directory to drop them.

use super::SearchResult;
use crate::error::Result;
use crate::paths;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Cache key for one search.
pub fn key(
    service: &str,
    query: &str,
    region: &str,
    tenant_id: Option<&str>,
    limit: Option<usize>,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        service,
        query,
        region,
        tenant_id.unwrap_or(""),
        &limit.map(|l| l.to_string()).unwrap_or_default(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

pub struct ResultCache {
    dir: PathBuf,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(paths::cache::searches_dir())
    }
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Cached result, if any. Unreadable entries count as misses.
    pub fn get(&self, key: &str) -> Option<SearchResult> {
        let path = self.entry(key);
        let contents = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(result) => {
                tracing::debug!(key, "search cache hit");
                Some(result)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable cache entry: {e}");
                None
            }
        }
    }

    pub fn put(&self, key: &str, result: &SearchResult) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.entry(key), serde_json::to_string(result)?)?;
        Ok(())
    }
}

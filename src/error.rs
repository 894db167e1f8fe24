//! Error taxonomy shared by every library module.
//!
//! The binary wraps these in `anyhow` at the command boundary. Library code
//! returns `Result<T>` so callers can match on the kind of failure (for
//! example to offer a re-authentication prompt).

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, MagicError>;

#[derive(Debug, Error)]
pub enum MagicError {
    /// Credentials missing, expired or rejected by the platform.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network, HTTP or GraphQL failure reported by the platform.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// Malformed input detected before any remote call was made.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Evidence or search query id not present in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Publishing stopped midway. Attached evidence stays attached,
    /// the rest stays staged.
    #[error("publish stopped after attaching {attached} evidence item(s), {remaining} still staged")]
    PartialPublish {
        attached: usize,
        remaining: usize,
        #[source]
        source: Box<MagicError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("evidence database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MagicError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

impl From<reqwest::Error> for MagicError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::Authentication(err.to_string())
            }
            _ => Self::Remote(err.to_string()),
        }
    }
}

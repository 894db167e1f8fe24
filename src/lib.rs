pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod evidence;
pub mod logging;
pub mod paths;
pub mod publisher;
pub mod search;
pub mod table;
pub mod tagger;

// Re-export commonly used types
pub use error::{MagicError, Result};
pub use evidence::{EvidenceKind, EvidenceStore};
pub use search::{QueryExecutor, SearchResult};
pub use table::Row;

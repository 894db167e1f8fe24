//! Command implementations for the `taegis-magic` binary.
//!
//! Each noun module owns its clap subcommand enum and an `execute` entry
//! point. Shared pieces live here: target/search arguments, the platform
//! connection with a single re-authentication retry, and evidence store
//! resolution.

pub mod alerts;
pub mod configure;
pub mod context;
pub mod directory;
pub mod events;
pub mod investigations;
pub mod output;
pub mod tag;

use anyhow::{Context as _, Result};
use clap::Args;
use output::OutputArgs;
use std::path::PathBuf;
use taegis_magic::client::{self, auth, HttpTransport, Service};
use taegis_magic::config::Config;
use taegis_magic::search::cache::{self, ResultCache};
use taegis_magic::search::{self, SearchKind, SearchRequest};
use taegis_magic::{paths, EvidenceStore, MagicError, QueryExecutor};

/// Region and tenant selection shared by every remote command.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Region name or API url (defaults to `defaults.region`)
    #[arg(long)]
    pub region: Option<String>,

    /// Tenant id (defaults to `defaults.tenant`)
    #[arg(long)]
    pub tenant: Option<String>,
}

/// Evidence store location.
#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// Evidence database file (defaults to `evidence.database`)
    #[arg(long)]
    pub database: Option<String>,
}

/// Arguments shared by `alerts search`, `events search` and
/// `investigations search`.
#[derive(Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Query text (read from stdin when omitted)
    #[arg(long)]
    pub cell: Option<String>,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Maximum rows to return
    #[arg(long)]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Stage the query as search_queries evidence (also `queries.track`)
    #[arg(long)]
    pub track: bool,

    /// Re-use the saved result of an identical earlier search
    #[arg(long)]
    pub cache: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Settings plus runtime flags, built once in `main`.
pub struct Runtime {
    pub config: Config,
    pub interactive: bool,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            interactive: auth::can_prompt(),
        }
    }

    pub fn region<'a>(&'a self, target: &'a TargetArgs) -> &'a str {
        target
            .region
            .as_deref()
            .unwrap_or(&self.config.defaults.region)
    }

    pub fn connect(&self, target: &TargetArgs) -> Result<Service<HttpTransport>> {
        let service = client::connect(
            &self.config,
            target.region.as_deref(),
            target.tenant.as_deref(),
            self.interactive,
        )?;
        Ok(service)
    }

    /// Run `f` against a connected service. When the platform rejects the
    /// stored token and a prompt is possible, the token is dropped, a new
    /// one is requested and `f` runs once more.
    pub fn with_service<R>(
        &self,
        target: &TargetArgs,
        mut f: impl FnMut(&Service<HttpTransport>) -> taegis_magic::Result<R>,
    ) -> Result<R> {
        let service = self.connect(target)?;
        match f(&service) {
            Err(e) if e.is_authentication() && self.can_reauthenticate() => {
                let region = self.region(target).to_string();
                tracing::warn!(region = %region, "{e}; requesting a new access token");
                auth::forget_token(&region, &paths::credentials_path())?;
                let service = self.connect(target)?;
                Ok(f(&service)?)
            }
            other => Ok(other?),
        }
    }

    fn can_reauthenticate(&self) -> bool {
        self.interactive && std::env::var_os(auth::ENV_TOKEN).is_none()
    }

    /// Evidence database path: `--database`, then `evidence.database`.
    pub fn database_path(&self, args: &DatabaseArgs) -> Option<PathBuf> {
        args.database
            .as_deref()
            .map(paths::expand)
            .or_else(|| self.config.evidence_database())
    }

    /// Open the evidence store, in memory when no path is configured.
    pub fn open_store(&self, args: &DatabaseArgs) -> Result<EvidenceStore> {
        match self.database_path(args) {
            Some(path) => EvidenceStore::open(&path)
                .with_context(|| format!("Failed to open evidence store {}", path.display())),
            None => {
                tracing::warn!(
                    "no evidence database configured, staged evidence will not outlive this command"
                );
                Ok(EvidenceStore::open_in_memory())
            }
        }
    }

    /// Like [`Runtime::open_store`] but refuses to fall back to memory.
    pub fn require_store(&self, args: &DatabaseArgs) -> Result<EvidenceStore> {
        let path = self.database_path(args).ok_or_else(|| {
            MagicError::validation(
                "no evidence database: pass --database or run `taegis-magic configure set evidence.database <path>`",
            )
        })?;
        EvidenceStore::open(&path)
            .with_context(|| format!("Failed to open evidence store {}", path.display()))
    }
}

/// Run a search command end to end: read the cell, consult the cache,
/// execute with tracking, then emit.
pub fn run_search(rt: &Runtime, kind: SearchKind, args: SearchArgs) -> Result<()> {
    let query = output::read_cell(args.cell)?;
    let track = args.track || rt.config.queries.track;
    let region = rt.region(&args.target).to_string();
    let tenant = args
        .target
        .tenant
        .clone()
        .or_else(|| rt.config.defaults.tenant.clone());

    let results_cache = ResultCache::default();
    let key = cache::key(kind.as_str(), &query, &region, tenant.as_deref(), args.limit);
    let cached = if args.cache {
        results_cache.get(&key)
    } else {
        None
    };

    let result = match cached {
        Some(result) => {
            tracing::info!(kind = %kind, "using cached search result");
            if track {
                let mut store = rt.open_store(&args.database)?;
                search::track_query(&mut store, &result)?;
            }
            result
        }
        None => {
            let mut store = if track {
                Some(rt.open_store(&args.database)?)
            } else {
                None
            };
            let request = SearchRequest::new(kind, query)
                .with_limit(args.limit)
                .with_tenant(args.target.tenant.clone());
            let result = rt.with_service(&args.target, |service| {
                QueryExecutor::new(service, &rt.config.queries)
                    .with_tracking(track)
                    .search(&request, store.as_mut())
            })?;
            if args.cache {
                results_cache.put(&key, &result)?;
            }
            result
        }
    };

    output::emit(result, &args.output, &rt.config)
}

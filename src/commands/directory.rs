//! Directory nouns: `tenants`, `users`, `clients`, `rules`, `audits` and
//! `threat`. Each subcommand is a single platform lookup.

use super::output::{self, OutputArgs};
use super::{Runtime, TargetArgs};
use anyhow::Result;
use clap::{Args, Subcommand};
use taegis_magic::search::{self, DirectoryQuery};

/// Target and output flags for a lookup.
#[derive(Args, Debug, Clone, Default)]
pub struct LookupArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Subcommand, Debug)]
pub enum TenantsCommand {
    /// List tenants, optionally filtered by name
    Search {
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[command(flatten)]
        args: LookupArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    /// Search users by email
    Search {
        #[arg(long)]
        email: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// The user behind the current token
    Current {
        #[command(flatten)]
        args: LookupArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClientsCommand {
    /// List API clients
    Search {
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[command(flatten)]
        args: LookupArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// List detection rules of one type
    Search {
        /// e.g. REGEX, QL, SUPPRESSION
        #[arg(long = "type", default_value = "REGEX")]
        rule_type: String,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// One rule by id
    Get {
        id: String,

        #[command(flatten)]
        args: LookupArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditsCommand {
    /// Audit log entries, optionally for one user
    Search {
        #[arg(long)]
        email: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// One audit record by id
    Get {
        id: String,

        #[command(flatten)]
        args: LookupArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ThreatCommand {
    /// Most recent threat publications
    Latest {
        #[arg(long, default_value_t = 10)]
        size: usize,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// Full-text search of threat publications
    Search {
        text: String,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// Watchlist indicators of one type
    Watchlist {
        /// e.g. ip, domain, hash
        #[arg(long = "type")]
        indicator_type: String,

        #[command(flatten)]
        args: LookupArgs,
    },
}

fn run(rt: &Runtime, args: LookupArgs, query: DirectoryQuery) -> Result<()> {
    tracing::info!(lookup = %query.describe(), "directory lookup");
    let result = rt.with_service(&args.target, |service| {
        search::lookup(service, args.target.tenant.as_deref(), &query)
    })?;
    output::emit(result, &args.output, &rt.config)
}

pub fn tenants(rt: &Runtime, command: TenantsCommand) -> Result<()> {
    match command {
        TenantsCommand::Search { name, limit, args } => {
            run(rt, args, DirectoryQuery::Tenants { name, limit })
        }
    }
}

pub fn users(rt: &Runtime, command: UsersCommand) -> Result<()> {
    match command {
        UsersCommand::Search { email, limit, args } => {
            run(rt, args, DirectoryQuery::Users { email, limit })
        }
        UsersCommand::Current { args } => run(rt, args, DirectoryQuery::CurrentUser),
    }
}

pub fn clients(rt: &Runtime, command: ClientsCommand) -> Result<()> {
    match command {
        ClientsCommand::Search { name, limit, args } => {
            run(rt, args, DirectoryQuery::Clients { name, limit })
        }
    }
}

pub fn rules(rt: &Runtime, command: RulesCommand) -> Result<()> {
    match command {
        RulesCommand::Search {
            rule_type,
            limit,
            args,
        } => run(rt, args, DirectoryQuery::Rules { rule_type, limit }),
        RulesCommand::Get { id, args } => run(rt, args, DirectoryQuery::Rule { id }),
    }
}

pub fn audits(rt: &Runtime, command: AuditsCommand) -> Result<()> {
    match command {
        AuditsCommand::Search { email, limit, args } => {
            run(rt, args, DirectoryQuery::Audits { email, limit })
        }
        AuditsCommand::Get { id, args } => run(rt, args, DirectoryQuery::Audit { id }),
    }
}

pub fn threat(rt: &Runtime, command: ThreatCommand) -> Result<()> {
    match command {
        ThreatCommand::Latest { size, args } => run(rt, args, DirectoryQuery::ThreatLatest { size }),
        ThreatCommand::Search { text, args } => run(rt, args, DirectoryQuery::ThreatSearch { text }),
        ThreatCommand::Watchlist {
            indicator_type,
            args,
        } => run(rt, args, DirectoryQuery::ThreatWatchlist { indicator_type }),
    }
}

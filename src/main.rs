use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use taegis_magic::config::{self, LogLevel};
use taegis_magic::logging;

mod commands;

use commands::alerts::AlertsCommand;
use commands::configure::ConfigureCommand;
use commands::context::ContextArgs;
use commands::directory::{
    AuditsCommand, ClientsCommand, RulesCommand, TenantsCommand, ThreatCommand, UsersCommand,
};
use commands::events::EventsCommand;
use commands::investigations::InvestigationsCommand;
use commands::tag::TagArgs;
use commands::Runtime;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Thin command-line client for the Taegis GraphQL API", long_about = None)]
struct Cli {
    #[command(flatten)]
    verbosity: Verbosity,

    #[command(subcommand)]
    command: Commands,
}

/// Log level overrides; the last one given wins.
#[derive(Args, Debug, Default)]
struct Verbosity {
    /// Log at info level
    #[arg(long, global = true)]
    verbose: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// Log at trace level
    #[arg(long, global = true)]
    trace: bool,
}

impl Verbosity {
    fn level(&self) -> Option<LogLevel> {
        if self.trace {
            Some(LogLevel::Trace)
        } else if self.debug {
            Some(LogLevel::Debug)
        } else if self.verbose {
            Some(LogLevel::Info)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search alerts
    Alerts {
        #[command(subcommand)]
        command: AlertsCommand,
    },

    /// Search events
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },

    /// Search, create and append to investigations; manage staged evidence
    Investigations {
        #[command(subcommand)]
        command: InvestigationsCommand,
    },

    /// Look up tenants
    Tenants {
        #[command(subcommand)]
        command: TenantsCommand,
    },

    /// Threat intelligence publications and watchlists
    Threat {
        #[command(subcommand)]
        command: ThreatCommand,
    },

    /// Look up detection rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Look up users
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },

    /// Look up API clients
    Clients {
        #[command(subcommand)]
        command: ClientsCommand,
    },

    /// Search audit logs
    Audits {
        #[command(subcommand)]
        command: AuditsCommand,
    },

    /// Settings, regions and access tokens
    Configure {
        #[command(subcommand)]
        command: ConfigureCommand,
    },

    /// Add derived columns to a saved result
    Tag(TagArgs),

    /// Generate follow-up queries for the entities in a saved result
    Context(ContextArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_default()?;
    logging::init(&config.logging, cli.verbosity.level());
    if !atty::is(atty::Stream::Stdout) {
        colored::control::set_override(false);
    }

    let rt = Runtime::new(config);
    match cli.command {
        Commands::Alerts { command } => commands::alerts::execute(&rt, command)?,
        Commands::Events { command } => commands::events::execute(&rt, command)?,
        Commands::Investigations { command } => {
            commands::investigations::execute(&rt, command)?;
        }
        Commands::Tenants { command } => commands::directory::tenants(&rt, command)?,
        Commands::Threat { command } => commands::directory::threat(&rt, command)?,
        Commands::Rules { command } => commands::directory::rules(&rt, command)?,
        Commands::Users { command } => commands::directory::users(&rt, command)?,
        Commands::Clients { command } => commands::directory::clients(&rt, command)?,
        Commands::Audits { command } => commands::directory::audits(&rt, command)?,
        Commands::Configure { command } => commands::configure::execute(&rt.config, command)?,
        Commands::Tag(args) => commands::tag::execute(&rt, args)?,
        Commands::Context(args) => commands::context::execute(&rt, args)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_precedence() {
        let cli = Cli::parse_from(["taegis-magic", "--debug", "--trace", "configure", "show"]);
        assert_eq!(cli.verbosity.level(), Some(LogLevel::Trace));

        let cli = Cli::parse_from(["taegis-magic", "configure", "show"]);
        assert_eq!(cli.verbosity.level(), None);
    }

    #[test]
    fn test_search_flags_parse() {
        let cli = Cli::parse_from([
            "taegis-magic",
            "alerts",
            "search",
            "--cell",
            "FROM alert",
            "--limit",
            "5",
            "--assign",
            "recent",
            "--append",
            "--track",
            "--region",
            "delta",
        ]);
        let Commands::Alerts {
            command: AlertsCommand::Search(args),
        } = cli.command
        else {
            panic!("expected alerts search");
        };
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.output.assign.as_deref(), Some("recent"));
        assert!(args.output.append && args.track);
        assert_eq!(args.target.region.as_deref(), Some("delta"));
    }

    #[test]
    fn test_append_requires_assign() {
        let parsed = Cli::try_parse_from(["taegis-magic", "alerts", "search", "--append"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_evidence_kind_argument() {
        let cli = Cli::try_parse_from([
            "taegis-magic",
            "investigations",
            "evidence",
            "stage",
            "events",
            "recent",
        ]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from([
            "taegis-magic",
            "investigations",
            "evidence",
            "stage",
            "widgets",
            "recent",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_read_paths_parse() {
        let cli = Cli::parse_from(["taegis-magic", "rules", "get", "rule-7", "--tenant", "t1"]);
        let Commands::Rules {
            command: RulesCommand::Get { id, args },
        } = cli.command
        else {
            panic!("expected rules get");
        };
        assert_eq!(id, "rule-7");
        assert_eq!(args.target.tenant.as_deref(), Some("t1"));

        let cli = Cli::parse_from(["taegis-magic", "audits", "get", "audit-3"]);
        assert!(matches!(
            cli.command,
            Commands::Audits {
                command: AuditsCommand::Get { .. }
            }
        ));

        for argv in [
            &["taegis-magic", "investigations", "attachments", "list", "--investigation", "inv-1"][..],
            &["taegis-magic", "investigations", "attachments", "get", "f1"][..],
            &["taegis-magic", "investigations", "attachments", "download", "f1", "--save-as", "out.bin"][..],
        ] {
            assert!(Cli::try_parse_from(argv).is_ok(), "{argv:?}");
        }
        assert!(Cli::try_parse_from(["taegis-magic", "investigations", "attachments", "list"]).is_err());
    }
}

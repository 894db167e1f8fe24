//! `investigations` noun: search, create, append, attachments and the evidence
//! staging area behind them.

use super::directory::LookupArgs;
use super::output::{self, OutputArgs};
use super::{run_search, DatabaseArgs, Runtime, SearchArgs, TargetArgs};
use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use std::fs;
use std::path::PathBuf;
use taegis_magic::evidence::{
    EvidenceFilter, EvidenceItem, EvidenceKind, EvidenceStore, NEW_INVESTIGATION,
};
use taegis_magic::publisher::{
    self, InvestigationPriority, InvestigationPublisher, NewInvestigation,
};
use taegis_magic::search::{self, SearchKind};
use taegis_magic::{client, paths, table, Row};

#[derive(Subcommand, Debug)]
pub enum InvestigationsCommand {
    /// Search investigations (`| head N` sets the row limit)
    Search(SearchArgs),

    /// Create an investigation from evidence staged for NEW
    Create(CreateArgs),

    /// Attach evidence staged for an existing investigation
    Append {
        /// Investigation id
        #[arg(long)]
        investigation: String,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Stage, inspect and drop evidence
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommand,
    },

    /// Manage tracked search queries
    SearchQueries {
        #[command(subcommand)]
        command: SearchQueriesCommand,
    },

    /// Read file attachments
    Attachments {
        #[command(subcommand)]
        command: AttachmentsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AttachmentsCommand {
    /// Files attached to an investigation
    List {
        /// Investigation id
        #[arg(long)]
        investigation: String,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// Metadata of one attachment
    Get {
        file_id: String,

        #[command(flatten)]
        args: LookupArgs,
    },

    /// Save an attachment to disk
    Download {
        file_id: String,

        /// Destination file (defaults to the attachment name)
        #[arg(long, value_name = "FILE")]
        save_as: Option<String>,

        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Investigation title
    #[arg(long)]
    pub title: String,

    /// Markdown file with the key findings
    #[arg(long, value_name = "FILE")]
    pub key_findings: PathBuf,

    /// LOW, MEDIUM, HIGH or CRITICAL (or 1-4)
    #[arg(long, default_value = "MEDIUM")]
    pub priority: InvestigationPriority,

    /// Investigation type
    #[arg(long = "type", default_value = "SECURITY_INVESTIGATION")]
    pub investigation_type: String,

    /// Initial status
    #[arg(long, default_value = "OPEN")]
    pub status: String,

    /// User id, email, @me, @tenant or @partner
    #[arg(long, default_value = "@customer")]
    pub assignee: String,

    /// Print the input that would be sent without calling the platform
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

/// Which staged items a command looks at.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// alerts, events or search_queries
    #[arg(long)]
    pub kind: Option<EvidenceKind>,

    /// Tenant id
    #[arg(long)]
    pub tenant: Option<String>,

    /// Investigation target (NEW for a not-yet-created investigation)
    #[arg(long)]
    pub investigation: Option<String>,
}

impl From<FilterArgs> for EvidenceFilter {
    fn from(args: FilterArgs) -> Self {
        EvidenceFilter {
            kind: args.kind,
            tenant_id: args.tenant,
            investigation_id: args.investigation,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum EvidenceCommand {
    /// Stage rows from a saved result or JSON file
    Stage {
        /// alerts, events or search_queries
        kind: EvidenceKind,

        /// Saved result name or JSON file
        results: String,

        /// Investigation id to target
        #[arg(long, default_value = NEW_INVESTIGATION)]
        investigation: String,

        /// Tenant for rows without a tenant column
        #[arg(long)]
        tenant: Option<String>,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Unstage the rows of a saved result or JSON file
    Unstage {
        kind: EvidenceKind,

        results: String,

        #[arg(long, default_value = NEW_INVESTIGATION)]
        investigation: String,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Show staged evidence
    Show {
        #[command(flatten)]
        filter: FilterArgs,

        /// Render markdown instead of JSON
        #[arg(long)]
        display: bool,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Remove one staged item from every tenant
    Remove {
        kind: EvidenceKind,

        id: String,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Drop staged evidence (everything when no filter is given)
    Clear {
        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum SearchQueriesCommand {
    /// List tracked search queries
    List {
        /// Investigation target
        #[arg(long)]
        investigation: Option<String>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Track a search query by id
    Add {
        /// Server-side query id
        id: String,

        /// Query text
        #[arg(long)]
        query: String,

        #[arg(long)]
        tenant: Option<String>,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Stop tracking a search query
    Remove {
        id: String,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Stop tracking every search query
    Clear {
        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Move queries tracked for NEW onto an existing investigation
    Stage {
        /// Investigation id
        #[arg(long)]
        investigation: String,

        #[arg(long)]
        tenant: Option<String>,

        #[command(flatten)]
        database: DatabaseArgs,
    },
}

pub fn execute(rt: &Runtime, command: InvestigationsCommand) -> Result<()> {
    match command {
        InvestigationsCommand::Search(args) => run_search(rt, SearchKind::Investigations, args),
        InvestigationsCommand::Create(args) => create(rt, args),
        InvestigationsCommand::Append {
            investigation,
            target,
            database,
        } => append(rt, &investigation, target, &database),
        InvestigationsCommand::Evidence { command } => evidence(rt, command),
        InvestigationsCommand::SearchQueries { command } => search_queries(rt, command),
        InvestigationsCommand::Attachments { command } => attachments(rt, command),
    }
}

fn create(rt: &Runtime, args: CreateArgs) -> Result<()> {
    let key_findings = fs::read_to_string(&args.key_findings).with_context(|| {
        format!(
            "Failed to read key findings from {}",
            args.key_findings.display()
        )
    })?;
    let store = rt.require_store(&args.database)?;

    let mut request = NewInvestigation::new(args.title, key_findings);
    request.priority = args.priority;
    request.investigation_type = args.investigation_type;
    request.status = args.status;
    request.assignee_id = args.assignee;
    request.tenant_id = args.target.tenant.clone();
    request.dry_run = args.dry_run;

    let created = if request.dry_run {
        publisher::preview(&store, &request, rt.config.defaults.tenant.as_deref())?
    } else {
        rt.with_service(&args.target, |service| {
            InvestigationPublisher::new(service).create(&store, &request)
        })?
    };

    println!("{}", serde_json::to_string_pretty(&created)?);
    match created.id() {
        Some(id) => println!("\nCreated investigation {id}"),
        None if created.dry_run => println!("\nDry run, nothing was created"),
        None => tracing::warn!("platform response carried no investigation id"),
    }
    Ok(())
}

fn append(
    rt: &Runtime,
    investigation: &str,
    target: TargetArgs,
    database: &DatabaseArgs,
) -> Result<()> {
    let mut store = rt.require_store(database)?;
    let report = rt.with_service(&target, |service| {
        InvestigationPublisher::new(service).append(&mut store, investigation, target.tenant.as_deref())
    })?;

    if report.total() == 0 {
        println!("Nothing staged for {investigation} in tenant {}", report.tenant_id);
        return Ok(());
    }
    for (kind, count) in &report.attached {
        println!("{:<15} {count} attached", kind.to_string());
    }
    println!("Attached {} item(s) to {}", report.total(), report.investigation_id);
    Ok(())
}

fn attachments(rt: &Runtime, command: AttachmentsCommand) -> Result<()> {
    match command {
        AttachmentsCommand::List {
            investigation,
            args,
        } => {
            let result = rt.with_service(&args.target, |service| {
                search::list_attachments(service, args.target.tenant.as_deref(), &investigation)
            })?;
            output::emit(result, &args.output, &rt.config)
        }
        AttachmentsCommand::Get { file_id, args } => {
            let result = rt.with_service(&args.target, |service| {
                search::get_attachment(service, args.target.tenant.as_deref(), &file_id)
            })?;
            output::emit(result, &args.output, &rt.config)
        }
        AttachmentsCommand::Download {
            file_id,
            save_as,
            target,
        } => {
            let result = rt.with_service(&target, |service| {
                search::get_attachment(service, target.tenant.as_deref(), &file_id)
            })?;
            let row = result
                .rows
                .first()
                .with_context(|| format!("No attachment {file_id}"))?;
            let (url, name) = search::download_target(row)?;
            let dest = paths::expand(save_as.as_deref().unwrap_or(&name));
            let bytes = client::download(&url, &dest, &rt.config.client)
                .with_context(|| format!("Failed to download attachment {file_id}"))?;
            println!("Saved {} ({bytes} bytes)", dest.display());
            Ok(())
        }
    }
}

/// Identifiers of `rows` for `kind`, skipping rows without one.
fn row_ids(kind: EvidenceKind, rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| table::coalesce(row, kind.id_columns()).and_then(table::cell_str))
        .collect()
}

fn evidence(rt: &Runtime, command: EvidenceCommand) -> Result<()> {
    match command {
        EvidenceCommand::Stage {
            kind,
            results,
            investigation,
            tenant,
            database,
        } => {
            let rows = output::load_rows(&results)?;
            // The configured tenant only fills in for rows that carry none.
            let tenant = tenant.or_else(|| {
                table::tenant_column(&rows)
                    .is_none()
                    .then(|| rt.config.defaults.tenant.clone())
                    .flatten()
            });
            let mut store = rt.require_store(&database)?;
            let changes = store.stage_for(kind, &rows, tenant.as_deref(), &investigation)?;
            output::print_changes(&changes);
        }
        EvidenceCommand::Unstage {
            kind,
            results,
            investigation,
            database,
        } => {
            let rows = output::load_rows(&results)?;
            let mut store = rt.require_store(&database)?;
            let changes = store.unstage(kind, &row_ids(kind, &rows), &investigation)?;
            output::print_changes(&changes);
        }
        EvidenceCommand::Show {
            filter,
            display,
            database,
        } => {
            let store = rt.require_store(&database)?;
            show(&store, &filter.into(), display)?;
        }
        EvidenceCommand::Remove { kind, id, database } => {
            let mut store = rt.require_store(&database)?;
            let removed = store.remove(kind, &id)?;
            println!("Removed {kind} {id} ({removed} copies)");
        }
        EvidenceCommand::Clear { filter, database } => {
            let mut store = rt.require_store(&database)?;
            let filter: EvidenceFilter = filter.into();
            let removed = if filter == EvidenceFilter::default() {
                store.clear()?
            } else {
                store.clear_matching(&filter)?
            };
            println!("Cleared {removed} staged item(s)");
        }
    }
    Ok(())
}

fn show(store: &EvidenceStore, filter: &EvidenceFilter, display: bool) -> Result<()> {
    let staged = store.show(filter);
    if !display {
        let rendered: serde_json::Map<String, serde_json::Value> = staged
            .iter()
            .map(|(tenant, kinds)| -> Result<(String, serde_json::Value)> {
                let kinds: serde_json::Map<String, serde_json::Value> = kinds
                    .iter()
                    .map(|(kind, items)| -> Result<(String, serde_json::Value)> {
                        Ok((kind.to_string(), serde_json::to_value(items)?))
                    })
                    .collect::<Result<_>>()?;
                Ok((tenant.clone(), serde_json::Value::Object(kinds)))
            })
            .collect::<Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    if staged.is_empty() {
        println!("No evidence staged.");
        return Ok(());
    }
    for (tenant, kinds) in &staged {
        println!("## Tenant {tenant}\n");
        for (kind, items) in kinds {
            println!("### {kind} ({})\n", items.len());
            let rows: Vec<Row> = items.iter().map(summary_row).collect();
            print!("{}", table::to_markdown(&rows, 50));
            println!();
        }
    }
    Ok(())
}

fn summary_row(item: &EvidenceItem) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), item.id.clone().into());
    row.insert(
        "investigation_id".to_string(),
        item.investigation_id.clone().into(),
    );
    row.insert("staged_at".to_string(), item.staged_at.clone().into());
    row
}

fn search_queries(rt: &Runtime, command: SearchQueriesCommand) -> Result<()> {
    match command {
        SearchQueriesCommand::List {
            investigation,
            output: out,
            database,
        } => {
            let store = rt.require_store(&database)?;
            let filter = EvidenceFilter {
                kind: Some(EvidenceKind::SearchQueries),
                investigation_id: investigation,
                ..Default::default()
            };
            let rows: Vec<Row> = store
                .items(&filter)
                .into_iter()
                .map(|item| {
                    let mut row = item.payload.clone();
                    row.insert(
                        "investigation_id".to_string(),
                        item.investigation_id.clone().into(),
                    );
                    row
                })
                .collect();
            output::emit_rows(rows, &out, &rt.config)?;
        }
        SearchQueriesCommand::Add {
            id,
            query,
            tenant,
            database,
        } => {
            let tenant = tenant
                .or_else(|| rt.config.defaults.tenant.clone())
                .context("No tenant given: pass --tenant or set defaults.tenant")?;
            let mut store = rt.require_store(&database)?;
            let payload = search::search_query_payload(&id, &tenant, &query, 0, -1);
            let added = store.stage_item(EvidenceItem::new(
                EvidenceKind::SearchQueries,
                &id,
                &tenant,
                NEW_INVESTIGATION,
                payload,
            ))?;
            if added {
                println!("Tracking search query {id}");
            } else {
                println!("Search query {id} is already tracked");
            }
        }
        SearchQueriesCommand::Remove { id, database } => {
            let mut store = rt.require_store(&database)?;
            store.remove(EvidenceKind::SearchQueries, &id)?;
            println!("Stopped tracking search query {id}");
        }
        SearchQueriesCommand::Clear { database } => {
            let mut store = rt.require_store(&database)?;
            let removed = store.clear_matching(&EvidenceFilter {
                kind: Some(EvidenceKind::SearchQueries),
                ..Default::default()
            })?;
            println!("Cleared {removed} tracked search query(ies)");
        }
        SearchQueriesCommand::Stage {
            investigation,
            tenant,
            database,
        } => {
            let mut store = rt.require_store(&database)?;
            let moved = store.retarget(
                EvidenceKind::SearchQueries,
                tenant.as_deref(),
                NEW_INVESTIGATION,
                &investigation,
            )?;
            println!("Staged {moved} search query(ies) for {investigation}");
        }
    }
    Ok(())
}

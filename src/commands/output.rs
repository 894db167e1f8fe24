//! Command input and output: query cells, named results and rendering.

use anyhow::{bail, Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use taegis_magic::config::Config;
use taegis_magic::evidence::StageChanges;
use taegis_magic::search::{SearchMetadata, SearchResult};
use taegis_magic::{paths, table, Row};

/// Rows shown by `--display` before the table is cut off.
const DISPLAY_ROWS: usize = 50;
const SUMMARY_TEMPLATE: &str = "search_results.md";

/// Where and how results go.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Save the rows as a named result for later commands
    #[arg(long, value_name = "NAME")]
    pub assign: Option<String>,

    /// Append to the named result instead of replacing it
    #[arg(long, requires = "assign")]
    pub append: bool,

    /// Render a markdown summary and table instead of JSON
    #[arg(long)]
    pub display: bool,
}

/// The query text: `--cell`, or stdin when it is not a terminal.
pub fn read_cell(cell: Option<String>) -> Result<String> {
    let text = match cell {
        Some(cell) => cell,
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read query from stdin")?;
            buf
        }
        None => bail!("No query given: pass --cell or pipe the query on stdin"),
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("Query is empty");
    }
    Ok(text)
}

/// A file path, or else the name of a saved result.
fn resolve(reference: &str) -> PathBuf {
    let path = paths::expand(reference);
    if path.is_file() {
        path
    } else {
        paths::results::path(reference)
    }
}

/// Saved content: either a full search result or bare rows.
enum Saved {
    Result(SearchResult),
    Rows(Vec<Row>),
}

fn read_saved(path: &Path) -> Result<Saved> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read results from {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    match value {
        Value::Array(items) => {
            let rows = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => bail!("expected an array of objects, found {other}"),
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Unsupported results in {}", path.display()))?;
            Ok(Saved::Rows(rows))
        }
        value => {
            let result: SearchResult = serde_json::from_value(value)
                .with_context(|| format!("Unsupported results in {}", path.display()))?;
            Ok(Saved::Result(result))
        }
    }
}

/// Rows from a named result or JSON file.
pub fn load_rows(reference: &str) -> Result<Vec<Row>> {
    let path = resolve(reference);
    if !path.is_file() {
        bail!("No saved result or file named '{reference}'");
    }
    Ok(match read_saved(&path)? {
        Saved::Result(result) => result.rows,
        Saved::Rows(rows) => rows,
    })
}

fn save_value(name: &str, value: &impl serde::Serialize) -> Result<()> {
    let path = paths::results::path(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to save result to {}", path.display()))?;
    tracing::info!(name, path = %path.display(), "saved result");
    Ok(())
}

/// Store `result` under `args.assign`, extending an earlier result when
/// `--append` is set. Returns what was stored.
fn assign_result(result: SearchResult, args: &OutputArgs) -> Result<SearchResult> {
    let Some(name) = args.assign.as_deref() else {
        return Ok(result);
    };
    let path = paths::results::path(name);
    let stored = if args.append && path.is_file() {
        match read_saved(&path)? {
            Saved::Result(mut earlier) => {
                earlier.extend(result);
                earlier
            }
            Saved::Rows(mut rows) => {
                let mut result = result;
                rows.append(&mut result.rows);
                result.metadata.results_returned = rows.len();
                result.rows = rows;
                result
            }
        }
    } else {
        result
    };
    save_value(name, &stored)?;
    Ok(stored)
}

/// Output a search result.
pub fn emit(result: SearchResult, args: &OutputArgs, config: &Config) -> Result<()> {
    let result = assign_result(result, args)?;
    if args.display {
        print!("{}", render(&result, config.template_dir().as_deref()));
    } else if !config.display.suppress {
        println!("{}", serde_json::to_string_pretty(&result.rows)?);
    }
    Ok(())
}

/// Output rows produced offline (tagging, context generation).
pub fn emit_rows(rows: Vec<Row>, args: &OutputArgs, config: &Config) -> Result<()> {
    let rows = match args.assign.as_deref() {
        Some(name) => {
            let path = paths::results::path(name);
            let rows = if args.append && path.is_file() {
                let mut earlier = load_rows(name)?;
                earlier.extend(rows);
                earlier
            } else {
                rows
            };
            save_value(name, &rows)?;
            rows
        }
        None => rows,
    };

    if args.display {
        println!("{}", "Results".bold());
        println!();
        print!("{}", table::to_markdown(&rows, DISPLAY_ROWS));
    } else if !config.display.suppress {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}

/// Markdown summary and table for a search result.
pub fn render(result: &SearchResult, template_dir: Option<&Path>) -> String {
    let summary = template_dir
        .map(|dir| dir.join(SUMMARY_TEMPLATE))
        .and_then(|path| fs::read_to_string(path).ok())
        .map(|template| fill_template(&template, &result.metadata))
        .unwrap_or_else(|| default_summary(&result.metadata));

    format!("{summary}\n{}", table::to_markdown(&result.rows, DISPLAY_ROWS))
}

fn summary_fields(meta: &SearchMetadata) -> Vec<(&'static str, String)> {
    vec![
        ("service", meta.service.clone()),
        ("query", meta.query.clone()),
        ("region", meta.region.clone()),
        ("tenant", meta.tenant_id.clone().unwrap_or_default()),
        ("returned", meta.results_returned.to_string()),
        (
            "total",
            meta.total_results
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ),
        ("query_id", meta.query_id.clone().unwrap_or_default()),
        ("status", meta.status.clone()),
    ]
}

fn fill_template(template: &str, meta: &SearchMetadata) -> String {
    summary_fields(meta)
        .into_iter()
        .fold(template.to_string(), |acc, (field, value)| {
            acc.replace(&format!("{{{{{field}}}}}"), &value)
        })
}

fn default_summary(meta: &SearchMetadata) -> String {
    let mut out = format!("{}\n\n", format!("## {} search", meta.service).bold());
    out.push_str("```\n");
    out.push_str(&meta.query);
    out.push_str("\n```\n\n");
    for (field, value) in summary_fields(meta).into_iter().skip(2) {
        if !value.is_empty() {
            out.push_str(&format!("- **{field}**: {value}\n"));
        }
    }
    if meta.truncated {
        out.push_str("- results were truncated at the limit\n");
    }
    out
}

/// One line per stage/unstage change.
pub fn print_changes(changes: &StageChanges) {
    let sign = if changes.difference >= 0 { "+" } else { "" };
    println!(
        "{:<8} {:<15} {:<38} {:>6} -> {:<6} ({sign}{})",
        format!("{:?}", changes.action).to_lowercase(),
        changes.kind.to_string(),
        changes.investigation_id,
        changes.before,
        changes.after,
        changes.difference
    );
}

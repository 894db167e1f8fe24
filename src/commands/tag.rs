//! `tag` noun: offline transforms of a saved result.

use super::output::{self, OutputArgs};
use super::Runtime;
use anyhow::Result;
use clap::{Args, ValueEnum};
use taegis_magic::tagger;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TagMode {
    /// Alert timestamps and severity
    Alerts,
    /// Event timestamps
    Events,
    /// Severity score and category only
    Severity,
    /// One row per entity
    Entities,
    /// Related entity columns (needs `entities` first)
    Relations,
}

#[derive(Args, Debug)]
pub struct TagArgs {
    /// Saved result name or JSON file
    pub results: String,

    #[arg(long, value_enum, default_value_t = TagMode::Alerts)]
    pub mode: TagMode,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn execute(rt: &Runtime, args: TagArgs) -> Result<()> {
    let rows = output::load_rows(&args.results)?;
    let settings = &rt.config.tagger;
    let tagged = match args.mode {
        TagMode::Alerts => tagger::tag_alerts(&rows, settings),
        TagMode::Events => tagger::tag_events(&rows, settings),
        TagMode::Severity => tagger::tag_severity(&rows),
        TagMode::Entities => tagger::normalize_entities(&rows),
        TagMode::Relations => tagger::relate_entities(&rows)?,
    };
    tracing::info!(mode = ?args.mode, input = rows.len(), output = tagged.len(), "tagged rows");
    output::emit_rows(tagged, &args.output, &rt.config)
}

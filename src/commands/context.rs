//! `context` noun: follow-up queries for the entities of a saved result.

use super::output::{self, OutputArgs};
use super::Runtime;
use anyhow::Result;
use clap::Args;
use taegis_magic::context::ContextQueryGenerator;
use taegis_magic::tagger::{self, entities::FIELD_COLUMN};
use taegis_magic::table;

#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Saved result name or JSON file
    pub results: String,

    /// Print the entity relation pairs instead of queries
    #[arg(long)]
    pub relations: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn execute(rt: &Runtime, args: ContextArgs) -> Result<()> {
    let mut rows = output::load_rows(&args.results)?;
    if !rows.is_empty() && !table::has_column(&rows, FIELD_COLUMN) {
        tracing::info!("normalizing entities before generating context");
        rows = tagger::normalize_entities(&rows);
    }
    let related = if rows.is_empty() {
        rows
    } else {
        tagger::relate_entities(&rows)?
    };

    if args.relations {
        let pairs = tagger::relations(&related);
        println!("{}", serde_json::to_string_pretty(&pairs)?);
        return Ok(());
    }

    let generator = ContextQueryGenerator::new(rt.config.context.clone());
    let queries = generator.generate_rows(&related)?;
    output::emit_rows(queries, &args.output, &rt.config)
}

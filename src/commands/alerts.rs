//! `alerts` noun.

use super::{run_search, Runtime, SearchArgs};
use anyhow::Result;
use clap::Subcommand;
use taegis_magic::search::SearchKind;

#[derive(Subcommand, Debug)]
pub enum AlertsCommand {
    /// Search alerts (`aggregate` queries return one row per group)
    Search(SearchArgs),
}

pub fn execute(rt: &Runtime, command: AlertsCommand) -> Result<()> {
    match command {
        AlertsCommand::Search(args) => run_search(rt, SearchKind::Alerts, args),
    }
}

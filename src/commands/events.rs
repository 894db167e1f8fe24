//! `events` noun.

use super::{run_search, Runtime, SearchArgs};
use anyhow::Result;
use clap::Subcommand;
use taegis_magic::search::SearchKind;

#[derive(Subcommand, Debug)]
pub enum EventsCommand {
    /// Search events, following result pages until the limit
    Search(SearchArgs),
}

pub fn execute(rt: &Runtime, command: EventsCommand) -> Result<()> {
    match command {
        EventsCommand::Search(args) => run_search(rt, SearchKind::Events, args),
    }
}

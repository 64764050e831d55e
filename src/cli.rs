use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "anisync",
    version,
    about = "Reconcile streaming watch history into an anime progress list"
)]
pub struct Cli {
    /// Log matching and reconciliation details to stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,
    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile history and write a changeset without touching the list
    Plan(RunArgs),
    /// Reconcile history and update the list as decisions are made
    Sync(RunArgs),
    /// Replay a saved changeset against the list
    Apply { changeset: PathBuf },
    /// Show the local list mirror
    List,
    /// Seed the local list mirror from a JSON export
    Import { file: PathBuf },
    /// Show catalog candidates for a title
    Search {
        title: String,
        #[arg(long)]
        season: Option<u32>,
        /// Search a local catalog dump instead of the live API
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Watch history export (JSON)
    #[arg(long)]
    pub history: PathBuf,
    /// Local catalog dump to search instead of the live API
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Changeset output path
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Diagnostics output path
    #[arg(long)]
    pub diagnostics: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    pub max_pages: usize,
    /// Keep paging even when history already looks reconciled
    #[arg(long)]
    pub no_early_stop: bool,
}

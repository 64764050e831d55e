mod app;
mod cli;
mod db;
mod http;
mod logging;
mod paths;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::init(logging::Verbosity::from_flags(cli.verbose, cli.quiet));
    app::run(cli)
}

//! wikimirror CLI - incremental mirroring of a wiki's revision history
//!
//! This is the main entry point for the wikimirror command-line interface.
//! Command implementations live in [`commands`].

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

mod cli;
mod commands;
mod output;
mod utils;

use cli::{Cli, Commands};

/// Exit status used when the run is interrupted with Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::logging::initialize_logging(&cli)?;

    tokio::select! {
        result = execute_command(&cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} rerun the same command to resume", "Interrupted:".yellow());
            std::process::exit(EXIT_INTERRUPTED);
        },
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Sync {
            bulk,
            incremental,
            format,
        } => commands::sync_site(cli, commands::sync_mode(*bulk, *incremental), *format).await,
        Commands::Page { name, format } => commands::sync_page(cli, name, *format).await,
        Commands::Plan {
            bulk,
            incremental,
            format,
        } => commands::show_plan(cli, commands::sync_mode(*bulk, *incremental), *format).await,
        Commands::Status { format } => commands::show_status(cli, *format),
        Commands::Show {
            name,
            number,
            metadata,
        } => commands::show_revision(cli, name, *number, *metadata),
    }
}

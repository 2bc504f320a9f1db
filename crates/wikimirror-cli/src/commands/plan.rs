//! Plan command implementation

use anyhow::Result;
use colored::Colorize;
use wikimirror_core::SyncMode;

use crate::cli::Cli;
use crate::output::{OutputFormat, print_json};

/// Show the pages a sync would process
pub async fn execute(cli: &Cli, mode: SyncMode, format: OutputFormat) -> Result<()> {
    let config = super::load_config(cli)?;
    let mut scheduler = super::open_scheduler(&config)?;
    let plan = scheduler.plan(mode).await?;

    match format {
        OutputFormat::Json => print_json(&plan)?,
        OutputFormat::Text => {
            let since = plan
                .last_full_sync
                .map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339());
            println!("Mode: {:?} (last full sync: {since})", plan.mode);
            println!(
                "{} of {} pages selected",
                plan.pages.len().to_string().bold(),
                plan.pages_listed
            );
            if plan.pages_ignored > 0 {
                println!("  {} pages ignored by configuration", plan.pages_ignored);
            }
            if plan.pages_already_complete > 0 {
                println!("  {} pages already complete", plan.pages_already_complete);
            }
            for page in &plan.pages {
                println!("  {page}");
            }
        },
    }
    Ok(())
}

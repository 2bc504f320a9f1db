//! Single-page sync command implementation

use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use wikimirror_core::{PageIdentity, PageOutcome};

use crate::cli::Cli;
use crate::output::{OutputFormat, print_json};

/// Execute a sync of one page
pub async fn execute(cli: &Cli, name: &str, format: OutputFormat) -> Result<()> {
    let page = PageIdentity::new(name)?;
    let config = super::load_config(cli)?;
    let mut scheduler = super::open_scheduler(&config)?;

    let outcome = scheduler.sync_one(&page).await?;

    match (format, outcome) {
        (OutputFormat::Json, PageOutcome::Missing) => {
            print_json(&json!({ "page": page.raw_name(), "missing": true }))?;
        },
        (OutputFormat::Json, PageOutcome::Synced(report)) => print_json(&report)?,
        (OutputFormat::Text, PageOutcome::Missing) => {
            println!("{} '{}' does not exist on the site", "⚠".yellow(), page);
        },
        (OutputFormat::Text, PageOutcome::Synced(report)) => {
            if !cli.quiet {
                println!(
                    "{} {}: {} new revisions ({} already archived), {} attachments",
                    "✓ Synced".green(),
                    page.to_string().green(),
                    report.revisions_committed,
                    report.revisions_present,
                    report.attachments_saved
                );
            }
            if report.has_gaps() {
                println!(
                    "{} {} revisions and {} attachments unavailable; rerun to retry",
                    "⚠".yellow(),
                    report.revisions_unavailable,
                    report.attachments_unavailable
                );
            }
        },
    }
    Ok(())
}

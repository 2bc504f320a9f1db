//! Sync command implementation

use anyhow::Result;
use colored::Colorize;
use wikimirror_core::{SyncMode, SyncReport};

use crate::cli::Cli;
use crate::output::{OutputFormat, print_json};

/// Execute a site-wide sync
pub async fn execute(cli: &Cli, mode: SyncMode, format: OutputFormat) -> Result<()> {
    let config = super::load_config(cli)?;
    let mut scheduler = super::open_scheduler(&config)?;

    if !cli.quiet && !format.is_machine() {
        eprintln!(
            "Syncing into {}",
            config.paths.root.display().to_string().cyan()
        );
    }

    let report = scheduler.run(mode).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_text_report(&report, cli.quiet),
    }
    Ok(())
}

fn mode_label(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Auto => "auto",
        SyncMode::Bulk => "bulk",
        SyncMode::Incremental => "incremental",
    }
}

fn print_text_report(report: &SyncReport, quiet: bool) {
    if quiet && report.is_complete() {
        return;
    }

    let plan = &report.plan;
    let mut selection = format!(
        "{} of {} pages selected ({} pass",
        plan.pages_selected,
        plan.pages_listed,
        mode_label(plan.mode)
    );
    if plan.pages_already_complete > 0 {
        selection.push_str(&format!(", {} already complete", plan.pages_already_complete));
    }
    if let Some(cutoff) = plan.cutoff {
        selection.push_str(&format!(", {} probes", cutoff.probes));
    }
    selection.push(')');
    println!("{selection}");

    println!(
        "{} {} pages, {} revisions, {} attachments",
        "✓ Synced".green(),
        report.pages_synced,
        report.revisions_committed,
        report.attachments_saved
    );
    if report.pages_missing > 0 {
        println!("  {} pages no longer exist", report.pages_missing);
    }
    if report.revisions_malformed > 0 {
        println!(
            "  {} unreadable revision rows skipped",
            report.revisions_malformed
        );
    }

    if report.marker_updated {
        println!("  Last full sync set to {}", report.started_at.to_rfc3339());
    } else if report.is_complete() {
        println!("  Completed pages were skipped; last full sync left unchanged");
    } else {
        println!(
            "{} {} pages failed, {} pages incomplete ({} revisions unavailable); rerun to retry",
            "⚠".yellow(),
            report.pages_failed,
            report.pages_incomplete,
            report.revisions_unavailable
        );
    }
}

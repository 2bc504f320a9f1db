//! Archive status command implementation

use anyhow::Result;
use serde::Serialize;
use wikimirror_core::{CompletionLedger, FsVersionStore, SyncMarker, VersionStore};

use crate::cli::Cli;
use crate::output::{OutputFormat, print_json};

/// Summary of the local archive
#[derive(Debug, Serialize)]
struct ArchiveStatus {
    root: String,
    pages_archived: usize,
    revisions_archived: usize,
    pages_complete: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_full_sync: Option<String>,
}

/// Execute the status command. Works offline.
pub fn execute(cli: &Cli, format: OutputFormat) -> Result<()> {
    let config = super::load_config(cli)?;
    let root = &config.paths.root;
    let store = FsVersionStore::open(root)?;

    let pages = store.list_pages()?;
    let mut revisions_archived = 0;
    for page in &pages {
        revisions_archived += store.existing_revision_numbers(page)?.len();
    }

    let status = ArchiveStatus {
        root: root.display().to_string(),
        pages_archived: pages.len(),
        revisions_archived,
        pages_complete: CompletionLedger::open_in(root)?.len(),
        last_full_sync: SyncMarker::in_root(root).load()?.map(|ts| ts.to_rfc3339()),
    };

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Text => {
            println!("wikimirror archive");
            println!("==================");
            println!("Location: {}", status.root);
            println!("Pages: {}", status.pages_archived);
            println!("Revisions: {}", status.revisions_archived);
            println!("Pages complete: {}", status.pages_complete);
            println!(
                "Last full sync: {}",
                status.last_full_sync.as_deref().unwrap_or("never")
            );
        },
    }
    Ok(())
}

//! Show command implementation

use anyhow::{Result, bail};
use colored::Colorize;
use wikimirror_core::{FsVersionStore, PageIdentity};

use crate::cli::Cli;

/// Print one archived revision
pub fn execute(cli: &Cli, name: &str, number: u32, metadata_only: bool) -> Result<()> {
    let page = PageIdentity::new(name)?;
    let config = super::load_config(cli)?;
    let store = FsVersionStore::open(&config.paths.root)?;

    let Some(record) = store.load_revision(&page, number)? else {
        bail!("Revision {number} of page '{page}' is not in the archive");
    };

    let descriptor = &record.descriptor;
    println!(
        "{} {} #{}",
        "Page:".bold(),
        page,
        descriptor.sequence_number
    );
    println!("{} {}", "Change:".bold(), descriptor.change_type);
    println!("{} {}", "Author:".bold(), descriptor.author);
    println!("{} {}", "Date:".bold(), descriptor.timestamp);
    if !descriptor.comment.is_empty() {
        println!("{} {}", "Comment:".bold(), descriptor.comment);
    }

    if !metadata_only {
        println!();
        print!("{}", record.source_text);
    }
    Ok(())
}

//! Command implementations for the wikimirror CLI
//!
//! Each command lives in its own submodule. Shared wiring (configuration
//! loading and building the scheduler) is kept here.

mod page;
mod plan;
mod show;
mod status;
mod sync;

use anyhow::{Context, Result};
use wikimirror_core::{
    CompletionLedger, Config, FsVersionStore, HttpRevisionSource, SiteSyncScheduler, SyncMarker,
    SyncMode,
};

use crate::cli::Cli;

pub use page::execute as sync_page;
pub use plan::execute as show_plan;
pub use show::execute as show_revision;
pub use status::execute as show_status;
pub use sync::execute as sync_site;

/// Scheduler wired to the HTTP source and the filesystem archive.
pub type Scheduler = SiteSyncScheduler<HttpRevisionSource, FsVersionStore>;

/// Map the `--bulk` / `--incremental` flags to a mode.
pub const fn sync_mode(bulk: bool, incremental: bool) -> SyncMode {
    if bulk {
        SyncMode::Bulk
    } else if incremental {
        SyncMode::Incremental
    } else {
        SyncMode::Auto
    }
}

/// Load configuration from `--config` or the default locations.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Build a scheduler for the configured site and archive.
pub fn open_scheduler(config: &Config) -> Result<Scheduler> {
    let root = &config.paths.root;
    let source = HttpRevisionSource::new(&config.resolve_endpoint()?, &config.fetch, config.retry.clone())?;
    let store = FsVersionStore::open(root)
        .with_context(|| format!("Failed to open archive at {}", root.display()))?;
    Ok(SiteSyncScheduler::new(
        source,
        store,
        CompletionLedger::open_in(root)?,
        SyncMarker::in_root(root),
        config.ignore.clone(),
    ))
}

//! # wikimirror-core
//!
//! Core functionality for wikimirror - an incremental mirror of a wiki's full
//! revision history on the local filesystem.
//!
//! Every revision of every page is stored as its own directory, written
//! atomically, so an interrupted run can always be resumed and a repeated run
//! only downloads what changed.
//!
//! ## Architecture
//!
//! - **Store**: [`FsVersionStore`] persists revisions and attachments and
//!   answers "what do we already have" ([`VersionStore`])
//! - **Sources**: [`RevisionSource`] abstracts the remote site; the
//!   [`HttpRevisionSource`] talks to the site's JSON API with a [`RetryPolicy`]
//! - **Planner**: [`PageSyncPlanner`] brings a single page up to date,
//!   stopping as soon as it reaches history that is already persisted
//! - **Scheduler**: [`SiteSyncScheduler`] selects pages for bulk or
//!   incremental runs and records progress in the [`CompletionLedger`] and
//!   [`SyncMarker`]
//! - **Error Handling**: one [`Error`] type with recoverable/fatal
//!   classification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wikimirror_core::{
//!     CompletionLedger, Config, FsVersionStore, HttpRevisionSource, SiteSyncScheduler,
//!     SyncMarker, SyncMode,
//! };
//!
//! # async fn run() -> wikimirror_core::Result<()> {
//! let config = Config::load()?;
//! let root = &config.paths.root;
//!
//! let source = HttpRevisionSource::new(
//!     &config.resolve_endpoint()?,
//!     &config.fetch,
//!     config.retry.clone(),
//! )?;
//! let mut scheduler = SiteSyncScheduler::new(
//!     source,
//!     FsVersionStore::open(root)?,
//!     CompletionLedger::open_in(root)?,
//!     SyncMarker::in_root(root),
//!     config.ignore.clone(),
//! );
//!
//! let report = scheduler.run(SyncMode::Auto).await?;
//! println!("{} revisions committed", report.revisions_committed);
//! # Ok(())
//! # }
//! ```

/// Configuration loading and ignore rules
pub mod config;
/// Error types and result aliases
pub mod error;
/// JSON API revision source
pub mod http_source;
/// Completion ledger and sync marker
pub mod ledger;
/// Filesystem-safe page identities
pub mod page_id;
/// Per-page synchronization
pub mod planner;
/// Retry with exponential backoff
pub mod retry;
/// Site-wide runs and cutoff search
pub mod scheduler;
/// Remote site abstraction
pub mod source;
/// Revision archive
pub mod store;
/// Core data types
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, FetchConfig, IgnoreRules, PathsConfig, SiteConfig};
pub use error::{Error, Result};
pub use http_source::{HttpRevisionPager, HttpRevisionSource};
pub use ledger::{CompletionLedger, SyncMarker};
pub use page_id::PageIdentity;
pub use planner::{PageOutcome, PageReport, PageSyncPlanner};
pub use retry::RetryPolicy;
pub use scheduler::{
    Cutoff, SiteSyncScheduler, SyncMode, SyncPlan, SyncPlanSummary, SyncReport, find_cutoff,
};
pub use source::{RevisionPager, RevisionSource};
pub use store::{FsVersionStore, VersionStore};
pub use types::*;

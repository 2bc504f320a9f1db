//! Site-wide synchronization runs.
//!
//! A run lists the site's pages, decides which of them need work, and hands
//! each one to a [`PageSyncPlanner`], oldest first:
//!
//! - **Bulk**: every page not yet in the completion ledger.
//! - **Incremental**: only the pages edited since the last completed full
//!   pass. The page list is ordered by last edit, newest first, so these
//!   pages form a prefix that is found with a binary search over
//!   `last_edited` probes ([`find_cutoff`]).
//!
//! The sync marker is advanced to the run's start time once every selected
//! page completed. A bulk pass that skipped ledgered pages after an earlier
//! full pass leaves the marker alone, since those pages were not checked.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::IgnoreRules;
use crate::planner::{PageOutcome, PageSyncPlanner};
use crate::{
    CompletionLedger, Error, PageIdentity, Result, RevisionSource, SiteSnapshotIndex, SyncMarker,
    VersionStore,
};

/// How pages are selected for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Incremental when a full pass has completed before, bulk otherwise.
    #[default]
    Auto,
    /// Every page missing from the completion ledger.
    Bulk,
    /// Pages edited since the last completed full pass.
    Incremental,
}

/// Result of the cutoff search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cutoff {
    /// Pages `[0, index)` of the newest-first list changed since the threshold.
    pub index: usize,
    /// Number of `last_edited` probes issued.
    pub probes: usize,
}

/// Find the boundary between pages edited on or after `threshold` and older
/// ones in a newest-first page list.
///
/// A probe that fails or reports no date counts as changed, which can only
/// move the boundary towards the old end of the list.
pub async fn find_cutoff<S>(source: &mut S, index: &SiteSnapshotIndex, threshold: NaiveDate) -> Cutoff
where
    S: RevisionSource + ?Sized,
{
    let mut low = 0;
    let mut high = index.len();
    let mut probes = 0;

    while low < high {
        let mid = low + (high - low) / 2;
        let Some(listing) = index.get(mid) else {
            break;
        };
        probes += 1;
        let changed = match source.last_edited(&listing.page).await {
            Ok(Some(date)) => date >= threshold,
            Ok(None) => true,
            Err(e) => {
                warn!(
                    page = %listing.page,
                    category = e.category(),
                    error = %e,
                    "Could not determine last edit, treating page as changed"
                );
                true
            },
        };
        debug!(page = %listing.page, position = mid, changed, "Cutoff probe");
        if changed {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    Cutoff { index: low, probes }
}

/// Pages selected for a run, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Mode actually used (never [`SyncMode::Auto`]).
    pub mode: SyncMode,
    /// Start time of the last completed full pass, if any.
    pub last_full_sync: Option<DateTime<Utc>>,
    /// Pages on the site after ignore rules.
    pub pages_listed: usize,
    /// Pages ignored by configuration.
    pub pages_ignored: usize,
    /// Pages skipped because the ledger marks them complete (bulk only).
    pub pages_already_complete: usize,
    /// Cutoff search result (incremental only).
    pub cutoff: Option<Cutoff>,
    /// Selected pages, oldest first.
    pub pages: Vec<PageIdentity>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// When the run started; stored as the new marker on success.
    pub started_at: DateTime<Utc>,
    /// Selection that was processed.
    #[serde(flatten)]
    pub plan: SyncPlanSummary,
    /// Pages walked without a page-level failure.
    pub pages_synced: usize,
    /// Pages that no longer exist on the site.
    pub pages_missing: usize,
    /// Pages that failed and were skipped.
    pub pages_failed: usize,
    /// Pages walked that left revisions or attachments behind.
    pub pages_incomplete: usize,
    /// Revisions committed across all pages.
    pub revisions_committed: usize,
    /// Revisions that could not be fetched.
    pub revisions_unavailable: usize,
    /// Revision rows that could not be parsed.
    pub revisions_malformed: usize,
    /// Attachments downloaded.
    pub attachments_saved: usize,
    /// Whether the sync marker was advanced.
    pub marker_updated: bool,
}

/// The part of a [`SyncPlan`] carried into a [`SyncReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlanSummary {
    /// Mode actually used.
    pub mode: SyncMode,
    /// Pages on the site after ignore rules.
    pub pages_listed: usize,
    /// Pages selected for processing.
    pub pages_selected: usize,
    /// Pages skipped because the ledger marks them complete.
    pub pages_already_complete: usize,
    /// Cutoff search result (incremental only).
    pub cutoff: Option<Cutoff>,
}

impl From<&SyncPlan> for SyncPlanSummary {
    fn from(plan: &SyncPlan) -> Self {
        Self {
            mode: plan.mode,
            pages_listed: plan.pages_listed,
            pages_selected: plan.pages.len(),
            pages_already_complete: plan.pages_already_complete,
            cutoff: plan.cutoff,
        }
    }
}

impl SyncReport {
    fn new(started_at: DateTime<Utc>, plan: &SyncPlan) -> Self {
        Self {
            started_at,
            plan: plan.into(),
            pages_synced: 0,
            pages_missing: 0,
            pages_failed: 0,
            pages_incomplete: 0,
            revisions_committed: 0,
            revisions_unavailable: 0,
            revisions_malformed: 0,
            attachments_saved: 0,
            marker_updated: false,
        }
    }

    /// Whether every selected page was fully captured.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.pages_failed == 0 && self.pages_incomplete == 0
    }
}

/// Drives whole-site runs.
pub struct SiteSyncScheduler<S, V> {
    source: S,
    store: V,
    ledger: CompletionLedger,
    marker: SyncMarker,
    ignore: IgnoreRules,
}

impl<S, V> SiteSyncScheduler<S, V>
where
    S: RevisionSource,
    V: VersionStore,
{
    /// Create a scheduler.
    pub const fn new(
        source: S,
        store: V,
        ledger: CompletionLedger,
        marker: SyncMarker,
        ignore: IgnoreRules,
    ) -> Self {
        Self {
            source,
            store,
            ledger,
            marker,
            ignore,
        }
    }

    /// The archive being written.
    pub const fn store(&self) -> &V {
        &self.store
    }

    /// The completion ledger.
    pub const fn ledger(&self) -> &CompletionLedger {
        &self.ledger
    }

    /// Select the pages a run in `mode` would process, without syncing.
    ///
    /// # Errors
    ///
    /// [`Error::PageListUnavailable`] when the site's page list cannot be
    /// fetched, [`Error::Config`] for an incremental run without a previous
    /// full pass.
    #[instrument(level = "debug", skip(self))]
    pub async fn plan(&mut self, mode: SyncMode) -> Result<SyncPlan> {
        let last_full_sync = self.marker.load()?;
        let mode = match (mode, last_full_sync) {
            (SyncMode::Auto, None) => SyncMode::Bulk,
            (SyncMode::Auto, Some(_)) => SyncMode::Incremental,
            (SyncMode::Incremental, None) => {
                return Err(Error::Config(
                    "Incremental sync needs a completed full sync; run a bulk sync first".into(),
                ));
            },
            (mode, _) => mode,
        };

        let mut index = self
            .source
            .list_pages()
            .await
            .map_err(|e| Error::PageListUnavailable(e.to_string()))?;
        let total = index.len();
        index.retain(|listing| !self.ignore.is_ignored(&listing.page));
        let pages_ignored = total - index.len();

        let mut plan = SyncPlan {
            mode,
            last_full_sync,
            pages_listed: index.len(),
            pages_ignored,
            pages_already_complete: 0,
            cutoff: None,
            pages: Vec::new(),
        };

        match (mode, last_full_sync) {
            (SyncMode::Incremental, Some(since)) => {
                let cutoff = find_cutoff(&mut self.source, &index, since.date_naive()).await;
                plan.pages = index
                    .oldest_first()
                    .skip(index.len() - cutoff.index)
                    .map(|listing| listing.page.clone())
                    .collect();
                plan.cutoff = Some(cutoff);
            },
            _ => {
                for listing in index.oldest_first() {
                    if self.ledger.contains(&listing.page) {
                        plan.pages_already_complete += 1;
                    } else {
                        plan.pages.push(listing.page.clone());
                    }
                }
            },
        }

        info!(
            mode = ?plan.mode,
            listed = plan.pages_listed,
            selected = plan.pages.len(),
            "Planned sync"
        );
        Ok(plan)
    }

    /// Run a full synchronization pass.
    ///
    /// Non-fatal page failures are logged and counted. The marker is only
    /// advanced when every selected page was fully captured and no page was
    /// skipped on the strength of the ledger since the previous marker.
    ///
    /// # Errors
    ///
    /// Any error for which [`Error::is_fatal`] holds aborts the run.
    #[instrument(level = "debug", skip(self))]
    pub async fn run(&mut self, mode: SyncMode) -> Result<SyncReport> {
        let started_at = Utc::now();
        let plan = self.plan(mode).await?;
        let mut report = SyncReport::new(started_at, &plan);

        for (position, page) in plan.pages.iter().enumerate() {
            debug!(page = %page, position, total = plan.pages.len(), "Syncing page");
            let outcome = PageSyncPlanner::new(&mut self.source, &self.store, &mut self.ledger)
                .sync_page(page)
                .await;
            match outcome {
                Ok(PageOutcome::Missing) => report.pages_missing += 1,
                Ok(PageOutcome::Synced(page_report)) => {
                    report.pages_synced += 1;
                    if page_report.has_gaps() {
                        report.pages_incomplete += 1;
                    }
                    report.revisions_committed += page_report.revisions_committed;
                    report.revisions_unavailable += page_report.revisions_unavailable;
                    report.revisions_malformed += page_report.revisions_malformed;
                    report.attachments_saved += page_report.attachments_saved;
                },
                Err(e) if e.is_fatal() => {
                    error!(page = %page, category = e.category(), error = %e, "Aborting sync");
                    return Err(e);
                },
                Err(e) => {
                    warn!(page = %page, category = e.category(), error = %e, "Page failed, continuing");
                    report.pages_failed += 1;
                },
            }
        }

        // Ledgered pages skipped by a bulk pass were not checked for edits
        // made since the previous marker
        let skipped_since_marker =
            plan.pages_already_complete > 0 && plan.last_full_sync.is_some();
        if !report.is_complete() {
            warn!(
                failed = report.pages_failed,
                incomplete = report.pages_incomplete,
                "Sync finished with gaps, keeping previous marker"
            );
        } else if skipped_since_marker {
            info!(
                skipped = plan.pages_already_complete,
                "Bulk pass skipped completed pages, keeping previous marker"
            );
        } else {
            self.marker.store(started_at)?;
            report.marker_updated = true;
        }

        info!(
            mode = ?report.plan.mode,
            pages = report.pages_synced,
            revisions = report.revisions_committed,
            "Sync finished"
        );
        Ok(report)
    }

    /// Sync a single page regardless of mode or ledger.
    ///
    /// The marker is never touched.
    ///
    /// # Errors
    ///
    /// Whatever [`PageSyncPlanner::sync_page`] returns for the page.
    pub async fn sync_one(&mut self, page: &PageIdentity) -> Result<PageOutcome> {
        PageSyncPlanner::new(&mut self.source, &self.store, &mut self.ledger)
            .sync_page(page)
            .await
    }
}

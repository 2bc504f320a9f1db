//! Per-page synchronization.
//!
//! [`PageSyncPlanner::sync_page`] brings one page of the archive up to date
//! with the site. The revision list is walked newest-first and the walk stops
//! as soon as it reaches history the archive already holds contiguously, so a
//! page with one new edit costs one batch request and one text fetch no matter
//! how long its history is.
//!
//! Given the persisted set `E` and `L = lowest_missing(E)`:
//!
//! - rows numbered below `L` end the walk (everything older is persisted),
//! - rows already in `E` are skipped,
//! - every other row is fetched and committed,
//! - the row numbered `L` is the last one looked at.
//!
//! A page reaches the completion ledger only when nothing was left behind.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::store::{lowest_missing, sanitize_attachment_name};
use crate::{
    CompletionLedger, Error, PageIdentity, Result, RevisionDescriptor, RevisionRecord,
    RevisionSource, VersionStore,
};

/// What happened to one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page no longer exists on the site. Nothing was written.
    Missing,
    /// The page was walked.
    Synced(PageReport),
}

/// Counters for one synchronized page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageReport {
    /// Raw page name.
    pub page: String,
    /// Revisions fetched and committed by this pass.
    pub revisions_committed: usize,
    /// Listed revisions that were already in the archive.
    pub revisions_present: usize,
    /// Rows that could not be parsed and were skipped.
    pub revisions_malformed: usize,
    /// Revisions whose text could not be obtained.
    pub revisions_unavailable: usize,
    /// Attachments downloaded.
    pub attachments_saved: usize,
    /// Attachments that could not be listed or downloaded.
    pub attachments_unavailable: usize,
    /// Whether the page was appended to the completion ledger.
    pub completed: bool,
}

impl PageReport {
    fn new(page: &PageIdentity) -> Self {
        Self {
            page: page.raw_name().to_string(),
            ..Self::default()
        }
    }

    /// Whether anything was left for a later pass.
    #[must_use]
    pub const fn has_gaps(&self) -> bool {
        self.revisions_unavailable > 0 || self.attachments_unavailable > 0
    }
}

/// Synchronizes single pages against a source, a store and the ledger.
pub struct PageSyncPlanner<'a, S: ?Sized, V: ?Sized> {
    source: &'a mut S,
    store: &'a V,
    ledger: &'a mut CompletionLedger,
}

impl<'a, S, V> PageSyncPlanner<'a, S, V>
where
    S: RevisionSource + ?Sized,
    V: VersionStore + ?Sized,
{
    /// Create a planner over the given collaborators.
    pub fn new(source: &'a mut S, store: &'a V, ledger: &'a mut CompletionLedger) -> Self {
        Self {
            source,
            store,
            ledger,
        }
    }

    /// Bring one page up to date.
    ///
    /// # Errors
    ///
    /// Fatal storage errors ([`Error::StorageWrite`], [`Error::RevisionExists`])
    /// and page-level source failures (for example an unavailable revision
    /// list) are returned. Unavailable revision texts, unavailable attachments
    /// and malformed rows are logged, counted and skipped.
    #[instrument(level = "debug", skip_all, fields(page = %page))]
    pub async fn sync_page(&mut self, page: &PageIdentity) -> Result<PageOutcome> {
        match self.source.page_exists(page).await {
            Ok(true) => {},
            Ok(false) | Err(Error::PageDoesNotExist(_)) => {
                info!(page = %page, "Page no longer exists, skipping");
                return Ok(PageOutcome::Missing);
            },
            Err(e) => return Err(e),
        }

        let existing = self.store.existing_revision_numbers(page)?;
        let mut report = PageReport::new(page);

        let walked = match self.sync_revisions(page, existing, &mut report).await {
            Ok(()) => self.sync_attachments(page, &mut report).await,
            Err(e) => Err(e),
        };
        match walked {
            Ok(()) => {},
            Err(Error::PageDoesNotExist(_)) => {
                info!(page = %page, "Page disappeared during sync");
                return Ok(PageOutcome::Missing);
            },
            Err(e) => return Err(e),
        }

        if report.has_gaps() {
            warn!(
                page = %page,
                unavailable_revisions = report.revisions_unavailable,
                unavailable_attachments = report.attachments_unavailable,
                "Page incomplete, not recording completion"
            );
        } else {
            self.ledger.append(page)?;
            report.completed = true;
        }

        info!(
            page = %page,
            committed = report.revisions_committed,
            attachments = report.attachments_saved,
            "Page synced"
        );
        Ok(PageOutcome::Synced(report))
    }

    async fn sync_revisions(
        &mut self,
        page: &PageIdentity,
        mut present: BTreeSet<u32>,
        report: &mut PageReport,
    ) -> Result<()> {
        let lowest_needed = lowest_missing(&present);
        debug!(page = %page, lowest_needed, persisted = present.len(), "Walking revision list");

        let mut pager = self.source.open_pager(page).await?;
        'walk: while let Some(batch) = pager.next_batch().await? {
            for row in &batch {
                let descriptor = match RevisionDescriptor::parse(page, row) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!(
                            page = %page,
                            raw = %row,
                            category = e.category(),
                            error = %e,
                            "Skipping malformed revision row"
                        );
                        report.revisions_malformed += 1;
                        continue;
                    },
                };

                let number = descriptor.sequence_number;
                if number < lowest_needed {
                    debug!(page = %page, number, "Reached persisted history");
                    break 'walk;
                }

                if present.contains(&number) {
                    report.revisions_present += 1;
                } else {
                    match self.source.fetch_revision_text(page, &descriptor).await {
                        Ok(source_text) => {
                            self.store.commit_revision(
                                page,
                                &RevisionRecord {
                                    descriptor,
                                    source_text,
                                },
                            )?;
                            present.insert(number);
                            report.revisions_committed += 1;
                            debug!(page = %page, number, "Revision committed");
                        },
                        Err(e @ Error::SourceUnavailable { .. }) => {
                            warn!(
                                page = %page,
                                number,
                                category = e.category(),
                                error = %e,
                                "Revision unavailable, leaving for a later pass"
                            );
                            report.revisions_unavailable += 1;
                        },
                        Err(e) => return Err(e),
                    }
                }

                if number == lowest_needed {
                    break 'walk;
                }
            }
        }
        Ok(())
    }

    async fn sync_attachments(&mut self, page: &PageIdentity, report: &mut PageReport) -> Result<()> {
        let attachments = match self.source.list_attachments(page).await {
            Ok(attachments) => attachments,
            Err(e @ Error::SourceUnavailable { .. }) => {
                warn!(page = %page, category = e.category(), error = %e, "Attachment list unavailable");
                report.attachments_unavailable += 1;
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        let stored = self.store.existing_attachments(page)?;
        for attachment in attachments {
            let name = sanitize_attachment_name(&attachment.filename);
            if stored.contains(&name) {
                continue;
            }
            match self.source.fetch_attachment(&attachment).await {
                Ok(bytes) => {
                    self.store.save_attachment(page, &name, &bytes)?;
                    report.attachments_saved += 1;
                },
                Err(e @ Error::SourceUnavailable { .. }) => {
                    warn!(
                        page = %page,
                        file = %attachment.filename,
                        category = e.category(),
                        error = %e,
                        "Attachment unavailable"
                    );
                    report.attachments_unavailable += 1;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSource, element_id, revision_text};
    use crate::{FsVersionStore, RawRevisionRow};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        store: FsVersionStore,
        ledger: CompletionLedger,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = FsVersionStore::open(temp.path()).unwrap();
            let ledger = CompletionLedger::open_in(temp.path()).unwrap();
            Self {
                _temp: temp,
                store,
                ledger,
            }
        }

        async fn sync(&mut self, source: &mut FakeSource, name: &str) -> Result<PageOutcome> {
            PageSyncPlanner::new(source, &self.store, &mut self.ledger)
                .sync_page(&page(name))
                .await
        }

        fn seed(&self, name: &str, numbers: impl IntoIterator<Item = u32>) {
            for number in numbers {
                self.store
                    .commit_revision(&page(name), &record(name, number))
                    .unwrap();
            }
        }

        fn numbers(&self, name: &str) -> BTreeSet<u32> {
            self.store.existing_revision_numbers(&page(name)).unwrap()
        }
    }

    fn page(name: &str) -> PageIdentity {
        PageIdentity::new(name).unwrap()
    }

    fn record(name: &str, number: u32) -> RevisionRecord {
        let row = RawRevisionRow {
            number: number.to_string(),
            element_id: element_id(name, number),
            flags: "S".to_string(),
            author: "editor".to_string(),
            date: "2015-06-01".to_string(),
            comment: String::new(),
        };
        RevisionRecord {
            descriptor: RevisionDescriptor::parse(&page(name), &row).unwrap(),
            source_text: revision_text(name, number),
        }
    }

    fn synced(outcome: PageOutcome) -> PageReport {
        match outcome {
            PageOutcome::Synced(report) => report,
            PageOutcome::Missing => panic!("page unexpectedly missing"),
        }
    }

    #[tokio::test]
    async fn test_fresh_page_commits_full_history() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source.add_page("start", 5, None);

        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(report.revisions_committed, 5);
        assert!(report.completed);
        assert_eq!(harness.numbers("start"), BTreeSet::from([1, 2, 3, 4, 5]));
        assert!(harness.ledger.contains(&page("start")));

        let stored = harness.store.load_revision(&page("start"), 3).unwrap().unwrap();
        assert_eq!(stored.source_text, revision_text("start", 3));
    }

    #[tokio::test]
    async fn test_early_exit_fetches_only_new_revisions() {
        let mut harness = Harness::new();
        harness.seed("start", 1..=7);
        let mut source = FakeSource::new();
        source.add_page("start", 10, None).batch_size(3);
        let calls = source.calls();

        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(report.revisions_committed, 3);
        assert_eq!(calls.fetched("start"), vec![10, 9, 8]);
        // Revision 8 closes the gap, so the second batch is never requested
        assert_eq!(calls.batches("start"), 1);
        assert_eq!(harness.numbers("start"), (1..=10).collect::<BTreeSet<u32>>());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source.add_page("start", 6, None);
        harness.sync(&mut source, "start").await.unwrap();

        let calls = source.calls();
        calls.clear();
        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(report.revisions_committed, 0);
        assert!(calls.fetched("start").is_empty());
        assert_eq!(calls.batches("start"), 1);
        assert_eq!(harness.numbers("start"), (1..=6).collect::<BTreeSet<u32>>());
    }

    #[tokio::test]
    async fn test_resume_after_partial_history() {
        let mut harness = Harness::new();
        harness.seed("start", 1..=5);
        let mut source = FakeSource::new();
        source.add_page("start", 7, None);
        let calls = source.calls();

        synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(calls.fetched("start"), vec![7, 6]);
        assert_eq!(harness.numbers("start"), (1..=7).collect::<BTreeSet<u32>>());
    }

    #[tokio::test]
    async fn test_gap_is_filled_without_refetching() {
        let mut harness = Harness::new();
        harness.seed("start", [1, 2, 4, 5]);
        let mut source = FakeSource::new();
        source.add_page("start", 5, None).batch_size(10);
        let calls = source.calls();

        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(calls.fetched("start"), vec![3]);
        assert_eq!(report.revisions_present, 2);
        assert_eq!(harness.numbers("start"), (1..=5).collect::<BTreeSet<u32>>());
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped_but_page_completes() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source.add_page("start", 3, None).insert_row(
            "start",
            1,
            RawRevisionRow {
                number: "n/a".to_string(),
                element_id: "junk".to_string(),
                ..RawRevisionRow::default()
            },
        );

        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(report.revisions_malformed, 1);
        assert_eq!(report.revisions_committed, 3);
        assert!(report.completed);
    }

    #[tokio::test]
    async fn test_unavailable_revision_keeps_page_out_of_ledger() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source.add_page("start", 4, None).make_unavailable("start", 2);

        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(report.revisions_unavailable, 1);
        assert_eq!(report.revisions_committed, 3);
        assert!(!report.completed);
        assert!(!harness.ledger.contains(&page("start")));
        assert_eq!(harness.numbers("start"), BTreeSet::from([1, 3, 4]));

        // The next pass picks up exactly the missing revision
        let mut retry = FakeSource::new();
        retry.add_page("start", 4, None);
        let calls = retry.calls();
        let report = synced(harness.sync(&mut retry, "start").await.unwrap());
        assert_eq!(calls.fetched("start"), vec![2]);
        assert!(report.completed);
    }

    #[tokio::test]
    async fn test_missing_page_is_not_an_error() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source.add_page("gone", 3, None).set_missing("gone");
        let calls = source.calls();

        let outcome = harness.sync(&mut source, "gone").await.unwrap();
        assert_eq!(outcome, PageOutcome::Missing);
        assert!(harness.ledger.is_empty());
        assert!(harness.numbers("gone").is_empty());
        assert_eq!(calls.batches("gone"), 0);
    }

    #[tokio::test]
    async fn test_attachments_downloaded_once() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source
            .add_page("start", 1, None)
            .add_attachment("start", "logo.png", b"png")
            .add_attachment("start", "notes.txt", b"notes");

        let first = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(first.attachments_saved, 2);

        let second = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(second.attachments_saved, 0);
        assert_eq!(
            harness.store.existing_attachments(&page("start")).unwrap(),
            BTreeSet::from(["logo.png".to_string(), "notes.txt".to_string()])
        );
    }

    #[tokio::test]
    async fn test_unavailable_attachment_blocks_ledger() {
        let mut harness = Harness::new();
        let mut source = FakeSource::new();
        source
            .add_page("start", 1, None)
            .add_attachment("start", "big.zip", b"zip")
            .make_attachment_unavailable("start", "big.zip");

        let report = synced(harness.sync(&mut source, "start").await.unwrap());
        assert_eq!(report.attachments_unavailable, 1);
        assert!(!report.completed);
    }

    /// Store that fails every commit after the first `budget` ones.
    struct FailingStore {
        inner: FsVersionStore,
        budget: Cell<usize>,
    }

    impl VersionStore for FailingStore {
        fn existing_revision_numbers(&self, page: &PageIdentity) -> Result<BTreeSet<u32>> {
            self.inner.existing_revision_numbers(page)
        }

        fn commit_revision(&self, page: &PageIdentity, record: &RevisionRecord) -> Result<()> {
            if self.budget.get() == 0 {
                return Err(Error::StorageWrite("disk full".to_string()));
            }
            self.budget.set(self.budget.get() - 1);
            self.inner.commit_revision(page, record)
        }

        fn existing_attachments(&self, page: &PageIdentity) -> Result<BTreeSet<String>> {
            self.inner.existing_attachments(page)
        }

        fn save_attachment(&self, page: &PageIdentity, filename: &str, bytes: &[u8]) -> Result<()> {
            self.inner.save_attachment(page, filename, bytes)
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_fatal_and_rerun_completes() {
        let temp = TempDir::new().unwrap();
        let store = FailingStore {
            inner: FsVersionStore::open(temp.path()).unwrap(),
            budget: Cell::new(5),
        };
        let mut ledger = CompletionLedger::open_in(temp.path()).unwrap();
        let mut source = FakeSource::new();
        source.add_page("start", 7, None);

        let err = PageSyncPlanner::new(&mut source, &store, &mut ledger)
            .sync_page(&page("start"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!ledger.contains(&page("start")));
        assert_eq!(
            store.existing_revision_numbers(&page("start")).unwrap(),
            BTreeSet::from([3, 4, 5, 6, 7])
        );

        // After the crash only the two missing revisions are fetched
        store.budget.set(usize::MAX);
        let calls = source.calls();
        calls.clear();
        PageSyncPlanner::new(&mut source, &store, &mut ledger)
            .sync_page(&page("start"))
            .await
            .unwrap();
        assert_eq!(calls.fetched("start"), vec![2, 1]);
        assert!(ledger.contains(&page("start")));
    }
}

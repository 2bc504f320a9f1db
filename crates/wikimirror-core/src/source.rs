//! The revision source contract.
//!
//! A [`RevisionSource`] is everything the engine knows about the remote site:
//! the page list, per-page revision history (paginated, newest-first),
//! revision text and the current attachment set. Implementations own all
//! retrying (see [`crate::RetryPolicy`]); the engine treats
//! [`crate::Error::SourceUnavailable`] as final for the affected item.
//!
//! The upstream session is a single stateful cursor, so sources are driven by
//! one caller at a time and need not be `Sync`.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Attachment, PageIdentity, RawRevisionRow, Result, RevisionDescriptor, SiteSnapshotIndex};

/// Cursor over one page's revision list, newest-first.
#[async_trait]
pub trait RevisionPager: Send {
    /// Fetch the next batch of rows.
    ///
    /// Returns `Ok(None)` once the history is exhausted. Batches are never
    /// empty; an empty upstream page is reported as exhaustion.
    async fn next_batch(&mut self) -> Result<Option<Vec<RawRevisionRow>>>;
}

/// Remote site access used by the planner and scheduler.
#[async_trait]
pub trait RevisionSource: Send {
    /// All pages of the site, most recently updated first.
    async fn list_pages(&mut self) -> Result<SiteSnapshotIndex>;

    /// Whether the page currently exists.
    async fn page_exists(&mut self, page: &PageIdentity) -> Result<bool>;

    /// Day of the page's most recent edit; `None` when the site does not say.
    async fn last_edited(&mut self, page: &PageIdentity) -> Result<Option<NaiveDate>>;

    /// Open a pager over the page's revision list.
    async fn open_pager(&mut self, page: &PageIdentity) -> Result<Box<dyn RevisionPager>>;

    /// Raw source text of one revision.
    async fn fetch_revision_text(
        &mut self,
        page: &PageIdentity,
        revision: &RevisionDescriptor,
    ) -> Result<String>;

    /// Files currently attached to the page.
    async fn list_attachments(&mut self, page: &PageIdentity) -> Result<Vec<Attachment>>;

    /// Content of one attachment.
    async fn fetch_attachment(&mut self, attachment: &Attachment) -> Result<Vec<u8>>;
}

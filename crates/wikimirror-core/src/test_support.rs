//! In-memory [`RevisionSource`] with call recording for engine tests.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    Attachment, Error, PageIdentity, PageListing, RawRevisionRow, Result, RevisionDescriptor,
    RevisionPager, RevisionSource, SiteSnapshotIndex,
};

/// A recorded source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPages,
    PageExists(String),
    LastEdited(String),
    Batch(String),
    FetchText(String, u32),
    ListAttachments(String),
    FetchAttachment(String),
}

/// Shared view of the calls a [`FakeSource`] received.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn all(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    /// Revision numbers whose text was requested for `page`, in request order.
    pub fn fetched(&self, page: &str) -> Vec<u32> {
        self.all()
            .into_iter()
            .filter_map(|call| match call {
                Call::FetchText(p, n) if p == page => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn batches(&self, page: &str) -> usize {
        self.count(|call| matches!(call, Call::Batch(p) if p == page))
    }

    pub fn probes(&self) -> usize {
        self.count(|call| matches!(call, Call::LastEdited(_)))
    }

    /// Pages whose existence was checked, in order.
    pub fn pages_visited(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|call| match call {
                Call::PageExists(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|call| pred(call)).count()
    }
}

#[derive(Debug, Default)]
struct FakePage {
    missing: bool,
    rows: Vec<RawRevisionRow>,
    texts: HashMap<String, String>,
    unavailable_texts: HashSet<u32>,
    last_edited: Option<NaiveDate>,
    failing_probe: bool,
    failing_pager: bool,
    attachments: Vec<Attachment>,
    files: HashMap<String, Vec<u8>>,
    unavailable_files: HashSet<String>,
}

/// Scriptable site. Pages are listed in the order they are added, which is
/// taken to be newest-first.
#[derive(Debug)]
pub struct FakeSource {
    order: Vec<String>,
    pages: HashMap<String, FakePage>,
    batch_size: usize,
    listing_fails: bool,
    calls: CallLog,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

pub fn element_id(page: &str, number: u32) -> String {
    format!("{page}/r{number}")
}

pub fn revision_text(page: &str, number: u32) -> String {
    format!("{page} revision {number}\n")
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            pages: HashMap::new(),
            batch_size: 3,
            listing_fails: false,
            calls: CallLog::default(),
        }
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn batch_size(&mut self, size: usize) -> &mut Self {
        self.batch_size = size.max(1);
        self
    }

    /// Add a page with revisions `1..=revisions`, listed newest-first.
    pub fn add_page(&mut self, name: &str, revisions: u32, last_edited: Option<NaiveDate>) -> &mut Self {
        let mut page = FakePage {
            last_edited,
            ..FakePage::default()
        };
        for number in (1..=revisions).rev() {
            let id = element_id(name, number);
            page.rows.push(RawRevisionRow {
                number: format!("{number}."),
                element_id: id.clone(),
                flags: if number == 1 { "N" } else { "S" }.to_string(),
                author: "editor".to_string(),
                date: "2015-06-01".to_string(),
                comment: format!("change {number}"),
            });
            page.texts.insert(id, revision_text(name, number));
        }
        self.order.push(name.to_string());
        self.pages.insert(name.to_string(), page);
        self
    }

    pub fn set_missing(&mut self, name: &str) -> &mut Self {
        self.page_mut(name).missing = true;
        self
    }

    pub fn make_unavailable(&mut self, name: &str, number: u32) -> &mut Self {
        self.page_mut(name).unavailable_texts.insert(number);
        self
    }

    /// Insert a raw row at `index` of the newest-first revision list.
    pub fn insert_row(&mut self, name: &str, index: usize, row: RawRevisionRow) -> &mut Self {
        self.page_mut(name).rows.insert(index, row);
        self
    }

    pub fn fail_probe(&mut self, name: &str) -> &mut Self {
        self.page_mut(name).failing_probe = true;
        self
    }

    /// Make the page's revision list unavailable.
    pub fn fail_pager(&mut self, name: &str) -> &mut Self {
        self.page_mut(name).failing_pager = true;
        self
    }

    pub fn add_attachment(&mut self, name: &str, filename: &str, bytes: &[u8]) -> &mut Self {
        let url = format!("/files/{name}/{filename}");
        let page = self.page_mut(name);
        page.attachments.push(Attachment {
            url: url.clone(),
            filename: filename.to_string(),
        });
        page.files.insert(url, bytes.to_vec());
        self
    }

    pub fn make_attachment_unavailable(&mut self, name: &str, filename: &str) -> &mut Self {
        let url = format!("/files/{name}/{filename}");
        self.page_mut(name).unavailable_files.insert(url);
        self
    }

    pub fn fail_listing(&mut self) -> &mut Self {
        self.listing_fails = true;
        self
    }

    fn page_mut(&mut self, name: &str) -> &mut FakePage {
        self.pages.get_mut(name).unwrap()
    }

    fn page(&self, page: &PageIdentity) -> Result<&FakePage> {
        match self.pages.get(page.raw_name()) {
            Some(fake) if !fake.missing => Ok(fake),
            _ => Err(Error::PageDoesNotExist(page.raw_name().to_string())),
        }
    }
}

fn unavailable(operation: &str) -> Error {
    Error::SourceUnavailable {
        operation: operation.to_string(),
        attempts: 5,
        last_error: "stale render".to_string(),
    }
}

#[async_trait]
impl RevisionSource for FakeSource {
    async fn list_pages(&mut self) -> Result<SiteSnapshotIndex> {
        self.calls.push(Call::ListPages);
        if self.listing_fails {
            return Err(unavailable("list_pages"));
        }
        Ok(SiteSnapshotIndex::newest_first(
            self.order
                .iter()
                .map(|name| PageListing {
                    page: PageIdentity::new(name).unwrap(),
                    last_updated: self.pages[name].last_edited,
                })
                .collect(),
        ))
    }

    async fn page_exists(&mut self, page: &PageIdentity) -> Result<bool> {
        self.calls.push(Call::PageExists(page.raw_name().to_string()));
        Ok(self.page(page).is_ok())
    }

    async fn last_edited(&mut self, page: &PageIdentity) -> Result<Option<NaiveDate>> {
        self.calls.push(Call::LastEdited(page.raw_name().to_string()));
        let fake = self.page(page)?;
        if fake.failing_probe {
            return Err(unavailable("last_edited"));
        }
        Ok(fake.last_edited)
    }

    async fn open_pager(&mut self, page: &PageIdentity) -> Result<Box<dyn RevisionPager>> {
        let (batches, failing) = match self.page(page) {
            Ok(fake) => (
                Some(
                    fake.rows
                        .chunks(self.batch_size)
                        .map(<[RawRevisionRow]>::to_vec)
                        .collect(),
                ),
                fake.failing_pager,
            ),
            Err(_) => (None, false),
        };
        Ok(Box::new(FakePager {
            page: page.raw_name().to_string(),
            batches,
            failing,
            calls: self.calls.clone(),
        }))
    }

    async fn fetch_revision_text(
        &mut self,
        page: &PageIdentity,
        revision: &RevisionDescriptor,
    ) -> Result<String> {
        self.calls.push(Call::FetchText(
            page.raw_name().to_string(),
            revision.sequence_number,
        ));
        let fake = self.page(page)?;
        if fake.unavailable_texts.contains(&revision.sequence_number) {
            return Err(unavailable("fetch_revision_text"));
        }
        fake.texts
            .get(&revision.element_id)
            .cloned()
            .ok_or_else(|| unavailable("fetch_revision_text"))
    }

    async fn list_attachments(&mut self, page: &PageIdentity) -> Result<Vec<Attachment>> {
        self.calls.push(Call::ListAttachments(page.raw_name().to_string()));
        Ok(self.page(page)?.attachments.clone())
    }

    async fn fetch_attachment(&mut self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.calls.push(Call::FetchAttachment(attachment.filename.clone()));
        self.pages
            .values()
            .find(|fake| fake.files.contains_key(&attachment.url))
            .filter(|fake| !fake.unavailable_files.contains(&attachment.url))
            .and_then(|fake| fake.files.get(&attachment.url).cloned())
            .ok_or_else(|| unavailable("fetch_attachment"))
    }
}

struct FakePager {
    page: String,
    batches: Option<VecDeque<Vec<RawRevisionRow>>>,
    failing: bool,
    calls: CallLog,
}

#[async_trait]
impl RevisionPager for FakePager {
    async fn next_batch(&mut self) -> Result<Option<Vec<RawRevisionRow>>> {
        self.calls.push(Call::Batch(self.page.clone()));
        if self.failing {
            return Err(unavailable("next_batch"));
        }
        match self.batches.as_mut() {
            Some(batches) => Ok(batches.pop_front()),
            None => Err(Error::PageDoesNotExist(self.page.clone())),
        }
    }
}

//! HTTP-backed [`RevisionSource`] speaking the wiki mirror JSON API.
//!
//! ## Endpoints
//!
//! All paths are relative to the configured endpoint:
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET pages` | `[{ "name", "updated"? }]`, newest-first |
//! | `GET pages/{name}` | `{ "name", "updated"? }`, 404 when missing |
//! | `GET pages/{name}/revisions?page=N` | `{ "rows": [..], "has_more": bool }` |
//! | `GET pages/{name}/revisions/{element_id}/source` | raw source text |
//! | `GET pages/{name}/files` | `[{ "url", "filename" }]` |
//!
//! Status 202 (still rendering), 429, 5xx, timeouts and refused connections
//! are transient. A successful but empty source body is a stale render and is
//! transient as well. Every call goes through the configured
//! [`RetryPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::types::parse_revision_date;
use crate::{
    Attachment, Error, PageIdentity, PageListing, RawRevisionRow, Result, RetryPolicy,
    RevisionDescriptor, RevisionPager, RevisionSource, SiteSnapshotIndex,
};

/// One entry of the page list.
#[derive(Debug, Deserialize)]
struct PageEntry {
    name: String,
    #[serde(default)]
    updated: Option<String>,
}

/// One page of a revision list.
#[derive(Debug, Deserialize)]
struct RevisionBatch {
    #[serde(default)]
    rows: Vec<RawRevisionRow>,
    #[serde(default)]
    has_more: bool,
}

/// Revision source backed by the site's JSON API.
#[derive(Debug, Clone)]
pub struct HttpRevisionSource {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl HttpRevisionSource {
    /// Create a source for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unusable endpoint URL and
    /// [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, fetch: &FetchConfig, retry: RetryPolicy) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("Invalid site endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Site endpoint '{endpoint}' cannot carry a path"
            )));
        }

        let user_agent = fetch
            .user_agent
            .clone()
            .unwrap_or_else(|| concat!("wikimirror/", env!("CARGO_PKG_VERSION")).to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_secs.max(1)))
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            endpoint,
            retry,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("Site endpoint '{}' cannot carry a path", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn page_url(&self, page: &PageIdentity, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["pages", page.raw_name()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, page: Option<&PageIdentity>) -> Result<T> {
        let response = send(&self.client, url, page).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Issue a GET and classify the status.
async fn send(client: &Client, url: Url, page: Option<&PageIdentity>) -> Result<Response> {
    debug!(url = %url, "GET");
    let response = client.get(url.clone()).send().await?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        if let Some(page) = page {
            return Err(Error::PageDoesNotExist(page.raw_name().to_string()));
        }
    }
    if status == StatusCode::ACCEPTED
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return Err(Error::TransientSource(format!("{status} from {url}")));
    }

    response.error_for_status().map_err(Error::Network)
}

#[async_trait]
impl RevisionSource for HttpRevisionSource {
    async fn list_pages(&mut self) -> Result<SiteSnapshotIndex> {
        let this = &*self;
        let url = this.url(&["pages"])?;
        let entries: Vec<PageEntry> = this
            .retry
            .run("list_pages", move || this.get_json(url.clone(), None))
            .await?;

        let mut listings = Vec::with_capacity(entries.len());
        for entry in entries {
            match PageIdentity::new(&entry.name) {
                Ok(page) => listings.push(PageListing {
                    page,
                    last_updated: entry.updated.as_deref().and_then(parse_revision_date),
                }),
                Err(e) => warn!(name = %entry.name, error = %e, "Skipping unusable page name"),
            }
        }
        debug!(pages = listings.len(), "Listed site pages");
        Ok(SiteSnapshotIndex::newest_first(listings))
    }

    async fn page_exists(&mut self, page: &PageIdentity) -> Result<bool> {
        let this = &*self;
        let url = this.page_url(page, &[])?;
        let result: Result<PageEntry> = this
            .retry
            .run("page_exists", move || this.get_json(url.clone(), Some(page)))
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(Error::PageDoesNotExist(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn last_edited(&mut self, page: &PageIdentity) -> Result<Option<NaiveDate>> {
        let this = &*self;
        let url = this.page_url(page, &[])?;
        let entry: PageEntry = this
            .retry
            .run("last_edited", move || this.get_json(url.clone(), Some(page)))
            .await?;
        Ok(entry.updated.as_deref().and_then(parse_revision_date))
    }

    async fn open_pager(&mut self, page: &PageIdentity) -> Result<Box<dyn RevisionPager>> {
        Ok(Box::new(HttpRevisionPager {
            client: self.client.clone(),
            url: self.page_url(page, &["revisions"])?,
            page: page.clone(),
            retry: self.retry.clone(),
            next_page: 1,
            exhausted: false,
        }))
    }

    async fn fetch_revision_text(
        &mut self,
        page: &PageIdentity,
        revision: &RevisionDescriptor,
    ) -> Result<String> {
        let this = &*self;
        let url = this.page_url(page, &["revisions", &revision.element_id, "source"])?;
        this.retry
            .run("fetch_revision_text", move || {
                let url = url.clone();
                async move {
                    let text = send(&this.client, url, Some(page)).await?.text().await?;
                    if text.trim().is_empty() {
                        return Err(Error::TransientSource(
                            "empty revision source (stale render)".to_string(),
                        ));
                    }
                    Ok(text)
                }
            })
            .await
    }

    async fn list_attachments(&mut self, page: &PageIdentity) -> Result<Vec<Attachment>> {
        let this = &*self;
        let url = this.page_url(page, &["files"])?;
        this.retry
            .run("list_attachments", move || this.get_json(url.clone(), Some(page)))
            .await
    }

    async fn fetch_attachment(&mut self, attachment: &Attachment) -> Result<Vec<u8>> {
        let this = &*self;
        let url = this.endpoint.join(&attachment.url).map_err(|e| {
            Error::Parse(format!("Invalid attachment URL '{}': {e}", attachment.url))
        })?;
        this.retry
            .run("fetch_attachment", move || {
                let url = url.clone();
                async move {
                    let bytes = send(&this.client, url, None).await?.bytes().await?;
                    Ok(bytes.to_vec())
                }
            })
            .await
    }
}

/// Pager over `pages/{name}/revisions?page=N`.
pub struct HttpRevisionPager {
    client: Client,
    url: Url,
    page: PageIdentity,
    retry: RetryPolicy,
    next_page: u32,
    exhausted: bool,
}

#[async_trait]
impl RevisionPager for HttpRevisionPager {
    async fn next_batch(&mut self) -> Result<Option<Vec<RawRevisionRow>>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("page", &self.next_page.to_string());

        let client = &self.client;
        let page = &self.page;
        let batch: RevisionBatch = self
            .retry
            .run("next_revision_batch", move || {
                let url = url.clone();
                async move {
                    let body = send(client, url, Some(page)).await?.bytes().await?;
                    Ok(serde_json::from_slice(&body)?)
                }
            })
            .await?;

        self.next_page += 1;
        if !batch.has_more {
            self.exhausted = true;
        }
        if batch.rows.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(batch.rows))
    }
}

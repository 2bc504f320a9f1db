//! Error types and handling for wikimirror-core operations.
//!
//! A single error enum covers every failure the sync engine can hit. Errors
//! are categorized so that the planner and scheduler can decide, per scope,
//! whether a failure skips one revision, one page, or aborts the whole run.
//!
//! ## Error Scopes
//!
//! - **Revision scope**: [`Error::SourceUnavailable`] on a text fetch and
//!   [`Error::MalformedDescriptor`] skip a single revision; the page continues.
//! - **Page scope**: [`Error::PageDoesNotExist`] is expected (deleted or renamed
//!   pages) and ends the page without a ledger entry.
//! - **Run scope**: [`Error::StorageWrite`], [`Error::RevisionExists`] and
//!   [`Error::PageListUnavailable`] are fatal (see [`Error::is_fatal`]).
//!
//! ```rust
//! use wikimirror_core::Error;
//!
//! let err = Error::StorageWrite("disk full".to_string());
//! assert!(err.is_fatal());
//! assert_eq!(err.category(), "storage_write");
//! ```

use thiserror::Error;

/// The main error type for wikimirror-core operations.
///
/// All public functions return `Result<T, Error>`. `Display` is meant for
/// operators reading logs; [`Error::category`] is the stable identifier used
/// in structured log fields.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed outside of a revision commit (config, ledger reads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed in a way that is not a transient source condition.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The source returned a stale, incomplete or throttled response.
    ///
    /// Only ever seen inside a [`crate::RetryPolicy`]; callers of a source
    /// observe [`Error::SourceUnavailable`] once the retry budget is spent.
    #[error("Transient source error: {0}")]
    TransientSource(String),

    /// The retry budget for one source operation was exhausted.
    ///
    /// Non-fatal: the affected revision stays uncommitted and is picked up by
    /// the next pass.
    #[error("Source unavailable for {operation} after {attempts} attempts: {last_error}")]
    SourceUnavailable {
        /// Operation that was being retried (e.g. `fetch_revision_text`).
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last transient failure.
        last_error: String,
    },

    /// The page is gone from the site. Expected; never logged as a failure.
    #[error("Page does not exist: {0}")]
    PageDoesNotExist(String),

    /// A revision-list row could not be turned into a descriptor.
    #[error("Malformed revision descriptor for page '{page}': {reason} (raw: {raw})")]
    MalformedDescriptor {
        /// Page the row belongs to.
        page: String,
        /// Raw row content, kept for diagnosis.
        raw: String,
        /// Which rule rejected it.
        reason: String,
    },

    /// Writing to the archive failed. Fatal: the run stops so that nothing
    /// half-written is ever published.
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Reading the archive failed or it holds unexpected content.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A commit was attempted for a revision that is already persisted.
    ///
    /// The planner never requests existing numbers, so this signals a bug.
    #[error("Revision {number} of page '{page}' already exists")]
    RevisionExists {
        /// Safe name of the page.
        page: String,
        /// Sequence number that already exists.
        number: u32,
    },

    /// The global page list could not be obtained; nothing was synced.
    #[error("Page list unavailable: {0}")]
    PageListUnavailable(String),

    /// A raw page name could not be normalized (empty or unrepresentable).
    #[error("Invalid page name '{0}'")]
    InvalidPageName(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parsing of structured content failed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::Parse(format!("XML error: {err}"))
    }
}

impl Error {
    /// Check if the error might clear up if the same operation is retried.
    ///
    /// Used by [`crate::RetryPolicy`] to decide whether another attempt is
    /// worthwhile. [`Error::SourceUnavailable`] is *not* recoverable: it is
    /// the result of a retry budget that has already been spent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransientSource(_) => true,
            // A body cut off mid-transfer is an incomplete render
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode(),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Check if the error must abort the whole run.
    ///
    /// Fatal errors are the ones where continuing could violate the
    /// completeness invariant or where there is nothing to iterate over.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StorageWrite(_)
                | Self::RevisionExists { .. }
                | Self::PageListUnavailable(_)
                | Self::Config(_)
        )
    }

    /// Get the error category as a stable string identifier for log fields.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::TransientSource(_) => "transient_source",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::PageDoesNotExist(_) => "page_does_not_exist",
            Self::MalformedDescriptor { .. } => "malformed_descriptor",
            Self::StorageWrite(_) => "storage_write",
            Self::Storage(_) => "storage",
            Self::RevisionExists { .. } => "revision_exists",
            Self::PageListUnavailable(_) => "page_list_unavailable",
            Self::InvalidPageName(_) => "invalid_page_name",
            Self::Config(_) => "config",
            Self::Parse(_) => "parse",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

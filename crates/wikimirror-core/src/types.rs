//! Core data types shared by the store, the sources and the sync engine.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, PageIdentity, Result};

/// Kind of change a revision made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Page creation.
    New,
    /// Source, title or metadata edit.
    Edit,
    /// Tag change.
    ChangeTags,
    /// File attached.
    NewFile,
    /// File removed.
    RemoveFile,
    /// Page deleted.
    DeletePage,
}

impl ChangeType {
    /// Canonical snake-case name, as written to revision metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Edit => "edit",
            Self::ChangeTags => "change_tags",
            Self::NewFile => "new_file",
            Self::RemoveFile => "remove_file",
            Self::DeletePage => "delete_page",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = Error;

    /// Accepts a single wiki flag letter or a spelled-out change type.
    ///
    /// Letters: `N` new, `S`/`R`/`M` edit, `A` tags, `F` new file,
    /// `X` remove file, `D` delete page. Names ignore case, `-` and `_`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let change = match trimmed {
            "N" => Some(Self::New),
            "S" | "R" | "M" => Some(Self::Edit),
            "A" => Some(Self::ChangeTags),
            "F" => Some(Self::NewFile),
            "X" => Some(Self::RemoveFile),
            "D" => Some(Self::DeletePage),
            _ => {
                let folded: String = trimmed
                    .chars()
                    .filter(|c| !matches!(c, '-' | '_' | ' '))
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                match folded.as_str() {
                    "new" => Some(Self::New),
                    "edit" => Some(Self::Edit),
                    "changetags" => Some(Self::ChangeTags),
                    "newfile" => Some(Self::NewFile),
                    "removefile" => Some(Self::RemoveFile),
                    "deletepage" => Some(Self::DeletePage),
                    _ => None,
                }
            },
        };
        change.ok_or_else(|| Error::Parse(format!("unknown change type '{trimmed}'")))
    }
}

/// Unparsed revision-list row as delivered by a [`crate::RevisionPager`].
///
/// Every field is kept as text so that parsing rules live in one place
/// ([`RevisionDescriptor::parse`]) rather than in each source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRevisionRow {
    /// Sequence number, e.g. `"12."`.
    pub number: String,
    /// Opaque element identifier used to fetch the revision source.
    pub element_id: String,
    /// Change flag letter or change type name.
    #[serde(default)]
    pub flags: String,
    /// Author display name, possibly with the date glued on.
    #[serde(default)]
    pub author: String,
    /// Date in one of the accepted formats, may be empty.
    #[serde(default)]
    pub date: String,
    /// Edit comment.
    #[serde(default)]
    pub comment: String,
}

impl fmt::Display for RawRevisionRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "number={:?} element_id={:?} flags={:?} author={:?} date={:?} comment={:?}",
            self.number, self.element_id, self.flags, self.author, self.date, self.comment
        )
    }
}

/// Descriptor of one historical revision of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionDescriptor {
    /// Per-page sequence number, starting at 1.
    pub sequence_number: u32,
    /// Opaque element identifier.
    pub element_id: String,
    /// What the revision changed.
    pub change_type: ChangeType,
    /// Author display name.
    pub author: String,
    /// Day of the edit.
    pub timestamp: NaiveDate,
    /// Edit comment, may be empty.
    pub comment: String,
}

#[allow(clippy::unwrap_used)]
static TRAILING_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)\s*(\d{1,2} [A-Za-z]{3} \d{4}(?: \d{1,2}:\d{2})?|\d{4}-\d{2}-\d{2})$")
        .unwrap()
});

impl RevisionDescriptor {
    /// Parse a raw row into a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDescriptor`] naming the rule that rejected
    /// the row. `page` is only used for the error context.
    pub fn parse(page: &PageIdentity, row: &RawRevisionRow) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedDescriptor {
            page: page.raw_name().to_string(),
            raw: row.to_string(),
            reason,
        };

        let number_text = row.number.trim().trim_end_matches('.').trim();
        let sequence_number = number_text
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| malformed(format!("invalid sequence number '{}'", row.number)))?;

        let element_id = row.element_id.trim();
        if element_id.is_empty() {
            return Err(malformed("missing element id".to_string()));
        }

        let change_type = row
            .flags
            .parse::<ChangeType>()
            .map_err(|e| malformed(e.to_string()))?;

        let (author, timestamp) = if row.date.trim().is_empty() {
            // The author cell sometimes swallows the date column
            let captures = TRAILING_DATE
                .captures(row.author.trim())
                .ok_or_else(|| malformed("missing date".to_string()))?;
            let date = parse_revision_date(&captures[2])
                .ok_or_else(|| malformed(format!("unparseable date '{}'", &captures[2])))?;
            (captures[1].trim().to_string(), date)
        } else {
            let date = parse_revision_date(&row.date)
                .ok_or_else(|| malformed(format!("unparseable date '{}'", row.date)))?;
            (row.author.trim().to_string(), date)
        };

        if author.is_empty() && change_type != ChangeType::DeletePage {
            return Err(malformed("missing author".to_string()));
        }

        Ok(Self {
            sequence_number,
            element_id: element_id.to_string(),
            change_type,
            author,
            timestamp,
            comment: row.comment.trim().to_string(),
        })
    }
}

/// Parse a revision date, discarding any time of day.
///
/// Accepts `YYYY-MM-DD`, `DD Mon YYYY` and `DD Mon YYYY HH:MM`.
#[must_use]
pub fn parse_revision_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d %b %Y"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%d %b %Y %H:%M").map(|dt| dt.date()))
        .ok()
}

/// A revision as persisted in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    /// Descriptor fields.
    pub descriptor: RevisionDescriptor,
    /// Raw wiki source of the revision.
    pub source_text: String,
}

/// One entry of the site page list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageListing {
    /// Page identity.
    pub page: PageIdentity,
    /// Last update day as reported by the list, if any.
    pub last_updated: Option<NaiveDate>,
}

/// The site's page list in canonical **newest-first** order.
///
/// Consumers needing oldest-first order go through
/// [`SiteSnapshotIndex::oldest_first`]; nothing else reverses the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteSnapshotIndex {
    pages: Vec<PageListing>,
}

impl SiteSnapshotIndex {
    /// Wrap a list that is already newest-first.
    #[must_use]
    pub const fn newest_first(pages: Vec<PageListing>) -> Self {
        Self { pages }
    }

    /// Number of pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Listing at `index` in newest-first order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PageListing> {
        self.pages.get(index)
    }

    /// Listings in newest-first order.
    #[must_use]
    pub fn as_slice(&self) -> &[PageListing] {
        &self.pages
    }

    /// Listings in oldest-first order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &PageListing> {
        self.pages.iter().rev()
    }

    /// Drop listings rejected by `keep`, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&PageListing) -> bool) {
        self.pages.retain(|listing| keep(listing));
    }
}

/// A file attached to a page in its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Download location.
    pub url: String,
    /// File name as listed by the site.
    pub filename: String,
}

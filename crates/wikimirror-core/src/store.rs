//! Persistent revision archive.
//!
//! The archive is the source of truth for "already captured": a revision
//! directory exists if and only if its record was completely written.
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//!   completed.txt              # completion ledger
//!   last-full-sync.txt         # last full pass marker
//!   S/Y/system%3Ajoin/         # bucket by first two characters of the safe name
//!     V0001/
//!       metadata.xml           # number, element id, change type, author, date, comment
//!       source.txt             # raw wiki source
//!     V0002/
//!     files/                   # current attachments (not versioned)
//!       logo.png
//!   M/Misc/%2Eprofile/
//! ```
//!
//! Revisions are assembled under a hidden `.pending-Vnnnn` directory and
//! renamed into place once every file is flushed and synced. A crash leaves at
//! most a pending directory, which is ignored and replaced by the next commit.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::{debug, warn};

use crate::types::parse_revision_date;
use crate::{Error, PageIdentity, Result, RevisionDescriptor, RevisionRecord};

/// Prefix of revision directory names.
pub const REVISION_MARKER: char = 'V';
/// Minimum digits in a revision directory name.
pub const REVISION_DIGITS: usize = 4;
/// Bucket used for non-alphabetic or missing characters.
pub const MISC_BUCKET: &str = "Misc";

const METADATA_FILE: &str = "metadata.xml";
const SOURCE_FILE: &str = "source.txt";
const FILES_DIR: &str = "files";
const PENDING_PREFIX: &str = ".pending-";

/// Record of what has been captured, keyed by page and revision number.
pub trait VersionStore {
    /// All persisted sequence numbers for the page; empty if the page is unknown.
    fn existing_revision_numbers(&self, page: &PageIdentity) -> Result<BTreeSet<u32>>;

    /// First gap in the run starting at 1, or `max + 1` when there is none.
    fn lowest_missing_revision(&self, page: &PageIdentity) -> Result<u32> {
        Ok(lowest_missing(&self.existing_revision_numbers(page)?))
    }

    /// Atomically persist a new revision.
    ///
    /// # Errors
    ///
    /// [`Error::RevisionExists`] if the number is already present,
    /// [`Error::StorageWrite`] if anything could not be written.
    fn commit_revision(&self, page: &PageIdentity, record: &RevisionRecord) -> Result<()>;

    /// Stored attachment file names for the page.
    fn existing_attachments(&self, page: &PageIdentity) -> Result<BTreeSet<String>>;

    /// Atomically store (or replace) one attachment.
    fn save_attachment(&self, page: &PageIdentity, filename: &str, bytes: &[u8]) -> Result<()>;
}

/// Smallest sequence number missing from the contiguous run starting at 1.
///
/// ```rust
/// use std::collections::BTreeSet;
/// use wikimirror_core::store::lowest_missing;
///
/// assert_eq!(lowest_missing(&BTreeSet::new()), 1);
/// assert_eq!(lowest_missing(&BTreeSet::from([1, 2, 4])), 3);
/// assert_eq!(lowest_missing(&BTreeSet::from([1, 2, 3])), 4);
/// ```
#[must_use]
pub fn lowest_missing(existing: &BTreeSet<u32>) -> u32 {
    let mut expected = 1;
    for &number in existing {
        if number > expected {
            break;
        }
        if number == expected {
            expected += 1;
        }
    }
    expected
}

/// Directory name for a revision number, e.g. `V0007`.
#[must_use]
pub fn revision_dir_name(number: u32) -> String {
    format!("{REVISION_MARKER}{number:0width$}", width = REVISION_DIGITS)
}

/// Inverse of [`revision_dir_name`]; `None` for anything else.
#[must_use]
pub fn parse_revision_dir_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(REVISION_MARKER)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n >= 1)
}

/// Reduce a site-supplied attachment name to a single safe path component.
#[must_use]
pub fn sanitize_attachment_name(name: &str) -> String {
    let mut sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Keep the name rooted in the files directory
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "_");
    }
    let sanitized = sanitized.trim_start_matches('.').to_string();

    if sanitized.is_empty() {
        "attachment".to_string()
    } else {
        sanitized
    }
}

fn bucket(c: Option<char>) -> String {
    match c {
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase().to_string(),
        _ => MISC_BUCKET.to_string(),
    }
}

/// Filesystem-backed [`VersionStore`].
pub struct FsVersionStore {
    root: PathBuf,
}

impl FsVersionStore {
    /// Open (and create if needed) an archive rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::StorageWrite(format!("Failed to create archive root: {e}")))?;
        Ok(Self { root })
    }

    /// Archive root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything for one page.
    #[must_use]
    pub fn page_dir(&self, page: &PageIdentity) -> PathBuf {
        let mut chars = page.safe_name().chars();
        let first = bucket(chars.next());
        let second = bucket(chars.next());
        self.root.join(first).join(second).join(page.safe_name())
    }

    /// Directory of one revision.
    #[must_use]
    pub fn revision_dir(&self, page: &PageIdentity, number: u32) -> PathBuf {
        self.page_dir(page).join(revision_dir_name(number))
    }

    fn files_dir(&self, page: &PageIdentity) -> PathBuf {
        self.page_dir(page).join(FILES_DIR)
    }

    /// Load a persisted revision.
    ///
    /// Returns `Ok(None)` when the revision is absent or is an operator
    /// placeholder (a directory without metadata).
    pub fn load_revision(&self, page: &PageIdentity, number: u32) -> Result<Option<RevisionRecord>> {
        let dir = self.revision_dir(page, number);
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.is_file() {
            return Ok(None);
        }

        let xml = fs::read_to_string(&metadata_path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {e}", metadata_path.display())))?;
        let descriptor = parse_metadata(&xml)?;
        let source_text = match fs::read_to_string(dir.join(SOURCE_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::Storage(format!("Failed to read revision source: {e}"))),
        };
        Ok(Some(RevisionRecord {
            descriptor,
            source_text,
        }))
    }

    /// Every page that has a directory in the archive, sorted by safe name.
    pub fn list_pages(&self) -> Result<Vec<PageIdentity>> {
        let mut pages = Vec::new();
        for first in read_subdirs(&self.root)? {
            for second in read_subdirs(&first)? {
                for page_dir in read_subdirs(&second)? {
                    let Some(name) = page_dir.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    match PageIdentity::from_safe_name(name) {
                        Ok(page) => pages.push(page),
                        Err(_) => warn!(dir = %page_dir.display(), "Ignoring unrecognized page directory"),
                    }
                }
            }
        }
        pages.sort_by(|a, b| a.safe_name().cmp(b.safe_name()));
        Ok(pages)
    }
}

impl VersionStore for FsVersionStore {
    fn existing_revision_numbers(&self, page: &PageIdentity) -> Result<BTreeSet<u32>> {
        let dir = self.page_dir(page);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {e}",
                    dir.display()
                )));
            },
        };

        let mut numbers = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Storage(format!("Failed to read entry: {e}")))?;
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if let Some(number) = entry.file_name().to_str().and_then(parse_revision_dir_name) {
                numbers.insert(number);
            }
        }
        Ok(numbers)
    }

    fn commit_revision(&self, page: &PageIdentity, record: &RevisionRecord) -> Result<()> {
        let number = record.descriptor.sequence_number;
        let page_dir = self.page_dir(page);
        let final_dir = page_dir.join(revision_dir_name(number));
        if final_dir.exists() {
            return Err(Error::RevisionExists {
                page: page.safe_name().to_string(),
                number,
            });
        }

        fs::create_dir_all(&page_dir)
            .map_err(|e| Error::StorageWrite(format!("Failed to create page directory: {e}")))?;

        let metadata = render_metadata(&record.descriptor)?;
        let pending = PendingDir::create(
            page_dir.join(format!("{PENDING_PREFIX}{}", revision_dir_name(number))),
        )?;
        write_synced(&pending.path.join(METADATA_FILE), &metadata)?;
        write_synced(&pending.path.join(SOURCE_FILE), record.source_text.as_bytes())?;
        pending.publish(&final_dir)?;
        sync_dir(&page_dir);

        debug!(page = %page, number, "Committed revision");
        Ok(())
    }

    fn existing_attachments(&self, page: &PageIdentity) -> Result<BTreeSet<String>> {
        let dir = self.files_dir(page);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(Error::Storage(format!("Failed to read attachments: {e}"))),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Storage(format!("Failed to read entry: {e}")))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if entry.file_type().is_ok_and(|t| t.is_file()) && !is_temp_name(&name) {
                names.insert(name);
            }
        }
        Ok(names)
    }

    fn save_attachment(&self, page: &PageIdentity, filename: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.files_dir(page);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::StorageWrite(format!("Failed to create files directory: {e}")))?;

        let name = sanitize_attachment_name(filename);
        let path = dir.join(&name);
        let tmp_path = dir.join(format!(".{name}.tmp"));
        write_synced(&tmp_path, bytes)?;

        // Handle Windows: remove target before rename
        #[cfg(target_os = "windows")]
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| Error::StorageWrite(format!("Failed to replace attachment: {e}")))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::StorageWrite(format!("Failed to commit attachment: {e}")));
        }

        debug!(page = %page, file = %name, bytes = bytes.len(), "Saved attachment");
        Ok(())
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Revision directory under construction; removed on drop unless published.
struct PendingDir {
    path: PathBuf,
    published: bool,
}

impl PendingDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            warn!(dir = %path.display(), "Removing stale pending revision");
            fs::remove_dir_all(&path)
                .map_err(|e| Error::StorageWrite(format!("Failed to clear pending revision: {e}")))?;
        }
        fs::create_dir(&path)
            .map_err(|e| Error::StorageWrite(format!("Failed to create pending revision: {e}")))?;
        Ok(Self {
            path,
            published: false,
        })
    }

    fn publish(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target)
            .map_err(|e| Error::StorageWrite(format!("Failed to publish revision: {e}")))?;
        self.published = true;
        Ok(())
    }
}

impl Drop for PendingDir {
    fn drop(&mut self) {
        if !self.published {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let write = || -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    write().map_err(|e| Error::StorageWrite(format!("Failed to write {}: {e}", path.display())))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Storage(format!("Failed to read {}: {e}", dir.display()))),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::Storage(format!("Failed to read entry: {e}")))?;
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn render_metadata(descriptor: &RevisionDescriptor) -> Result<Vec<u8>> {
    let number = descriptor.sequence_number.to_string();
    let date = descriptor.timestamp.format("%Y-%m-%d").to_string();
    let fields = [
        ("number", number.as_str()),
        ("element_id", descriptor.element_id.as_str()),
        ("change_type", descriptor.change_type.as_str()),
        ("author", descriptor.author.as_str()),
        ("date", date.as_str()),
        ("comment", descriptor.comment.as_str()),
    ];

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("data")))?;
    for (name, value) in fields {
        writer
            .create_element(name)
            .write_text_content(BytesText::new(value))?;
    }
    writer.write_event(Event::End(BytesEnd::new("data")))?;
    Ok(writer.into_inner())
}

fn parse_metadata(xml: &str) -> Result<RevisionDescriptor> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name != "data" {
                    fields.entry(name.clone()).or_default();
                    current = Some(name);
                }
            },
            Ok(Event::Text(e)) => {
                if let Some(ref name) = current {
                    let text = e.unescape().map_err(|e| Error::Parse(e.to_string()))?;
                    fields.entry(name.clone()).or_default().push_str(&text);
                }
            },
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Parse(format!("XML parse error: {e}"))),
            _ => {},
        }
        buf.clear();
    }

    let field = |name: &str| -> Result<&str> {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::Parse(format!("revision metadata is missing <{name}>")))
    };

    let sequence_number = field("number")?
        .parse::<u32>()
        .map_err(|e| Error::Parse(format!("invalid <number>: {e}")))?;
    let timestamp = parse_revision_date(field("date")?)
        .ok_or_else(|| Error::Parse("invalid <date>".to_string()))?;
    Ok(RevisionDescriptor {
        sequence_number,
        element_id: field("element_id")?.to_string(),
        change_type: field("change_type")?.parse()?,
        author: field("author")?.to_string(),
        timestamp,
        comment: fields.get("comment").cloned().unwrap_or_default(),
    })
}

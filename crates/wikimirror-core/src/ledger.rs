//! Append-only completion ledger and the last-full-sync marker.
//!
//! The ledger lists, one safe page name per line, every page whose sync pass
//! ran to completion. Bulk passes use it to skip finished pages after a
//! restart. The marker holds the start time of the last completed full pass
//! and drives incremental mode.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{Error, PageIdentity, Result};

/// File name of the ledger inside the archive root.
pub const LEDGER_FILE: &str = "completed.txt";
/// File name of the marker inside the archive root.
pub const MARKER_FILE: &str = "last-full-sync.txt";

/// Append-only record of fully synchronized pages.
#[derive(Debug)]
pub struct CompletionLedger {
    path: PathBuf,
    completed: HashSet<String>,
    /// Length of the intact prefix when the file ends in a partial line.
    torn_at: Option<u64>,
}

impl CompletionLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger.
    ///
    /// Blank lines are skipped. A last line without a terminating newline was
    /// cut short by a crash and is discarded, so that page is synced again.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::Io(e)),
        };

        let end = content.rfind('\n').map_or(0, |i| i + 1);
        let torn_at = if end < content.len() {
            warn!(
                path = %path.display(),
                fragment = &content[end..],
                "Discarding truncated ledger entry"
            );
            u64::try_from(end).ok()
        } else {
            None
        };

        let completed: HashSet<String> = content[..end]
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect();
        debug!(path = %path.display(), entries = completed.len(), "Loaded completion ledger");
        Ok(Self {
            path,
            completed,
            torn_at,
        })
    }

    /// Ledger stored in the standard location under an archive root.
    pub fn open_in(root: &Path) -> Result<Self> {
        Self::open(root.join(LEDGER_FILE))
    }

    /// Whether the page has a completion entry.
    #[must_use]
    pub fn contains(&self, page: &PageIdentity) -> bool {
        self.completed.contains(page.safe_name())
    }

    /// Number of distinct pages recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Whether no page has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Append a page. The line is flushed and synced before returning.
    ///
    /// Pages already present are appended again; readers deduplicate. A
    /// truncated entry found at load time is cut off first.
    pub fn append(&mut self, page: &PageIdentity) -> Result<()> {
        if let Some(len) = self.torn_at {
            OpenOptions::new()
                .write(true)
                .open(&self.path)
                .and_then(|file| file.set_len(len))
                .map_err(|e| Error::StorageWrite(format!("Failed to repair ledger: {e}")))?;
            self.torn_at = None;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::StorageWrite(format!("Failed to open ledger: {e}")))?;
        writeln!(file, "{}", page.safe_name())
            .and_then(|()| file.sync_data())
            .map_err(|e| Error::StorageWrite(format!("Failed to append to ledger: {e}")))?;
        self.completed.insert(page.safe_name().to_string());
        Ok(())
    }
}

/// Timestamp of the last completed full pass.
#[derive(Debug, Clone)]
pub struct SyncMarker {
    path: PathBuf,
}

impl SyncMarker {
    /// Marker at an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker stored in the standard location under an archive root.
    #[must_use]
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(MARKER_FILE))
    }

    /// Read the marker; `None` if no full pass ever completed.
    ///
    /// An unreadable timestamp is reported and treated as absent, which
    /// falls back to a bulk pass.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        match DateTime::parse_from_rfc3339(content.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable sync marker");
                Ok(None)
            },
        }
    }

    /// Overwrite the marker atomically.
    pub fn store(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            writeln!(file, "{}", timestamp.to_rfc3339())?;
            file.sync_all()
        };
        write().map_err(|e| Error::StorageWrite(format!("Failed to write sync marker: {e}")))?;

        #[cfg(target_os = "windows")]
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| Error::StorageWrite(format!("Failed to replace sync marker: {e}")))?;
        }

        fs::rename(&tmp_path, &self.path)
            .map_err(|e| Error::StorageWrite(format!("Failed to commit sync marker: {e}")))?;
        Ok(())
    }
}

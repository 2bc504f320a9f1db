//! Filesystem-safe page identities.
//!
//! Site page names may contain characters that are not valid in file names
//! (`system:join`), or may be reserved device names on some platforms
//! (`con`, `aux.txt`). [`PageIdentity`] maps a raw name to a safe name by
//! percent-escaping offending bytes. `%` is itself escaped, which makes the
//! mapping injective and reversible.
//!
//! ```rust
//! use wikimirror_core::PageIdentity;
//!
//! let page = PageIdentity::new("system:join")?;
//! assert_eq!(page.safe_name(), "system%3Ajoin");
//! assert_eq!(page.raw_name(), "system:join");
//!
//! let device = PageIdentity::new("con")?;
//! assert_eq!(device.safe_name(), "%63on");
//! # Ok::<(), wikimirror_core::Error>(())
//! ```

use std::fmt::{self, Write};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Device names reserved on Windows regardless of extension.
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters that always get escaped.
const RESERVED_CHARS: &[char] = &[':', '<', '>', '"', '/', '\\', '|', '?', '*', '%'];

/// Normalized identity of a wiki page.
///
/// Holds both the raw site name and the derived safe name. Equality and
/// hashing follow the safe name, which is a bijection of the raw name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageIdentity {
    safe: String,
    raw: String,
}

impl PageIdentity {
    /// Normalize a raw site page name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPageName`] for an empty (or all-whitespace) name.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::InvalidPageName(raw));
        }
        let safe = escape(&raw);
        Ok(Self { safe, raw })
    }

    /// Rebuild an identity from a safe name found on disk or in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPageName`] if `safe` is not the exact output of
    /// [`PageIdentity::new`] for any raw name.
    pub fn from_safe_name(safe: &str) -> Result<Self> {
        let raw = unescape(safe).ok_or_else(|| Error::InvalidPageName(safe.to_string()))?;
        let page = Self::new(raw)?;
        if page.safe != safe {
            return Err(Error::InvalidPageName(safe.to_string()));
        }
        Ok(page)
    }

    /// Filesystem-safe name.
    #[must_use]
    pub fn safe_name(&self) -> &str {
        &self.safe
    }

    /// Name as the site reports it.
    #[must_use]
    pub fn raw_name(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for PageIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for PageIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

fn needs_escape(c: char, index: usize, last: usize) -> bool {
    RESERVED_CHARS.contains(&c)
        || c.is_control()
        || (index == 0 && c == '.')
        || (index == last && matches!(c, '.' | ' '))
}

fn push_escaped(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for byte in c.encode_utf8(&mut buf).bytes() {
        // write! to String is infallible
        let _ = write!(out, "%{byte:02X}");
    }
}

fn escape(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let last = chars.len().saturating_sub(1);
    let mut out = String::with_capacity(raw.len());
    for (index, &c) in chars.iter().enumerate() {
        if needs_escape(c, index, last) {
            push_escaped(&mut out, c);
        } else {
            out.push(c);
        }
    }

    if is_reserved_device_name(&out) {
        let mut chars = out.chars();
        if let Some(first) = chars.next() {
            let mut escaped = String::with_capacity(out.len() + 2);
            push_escaped(&mut escaped, first);
            escaped.push_str(chars.as_str());
            return escaped;
        }
    }
    out
}

fn is_reserved_device_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim_end();
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

fn unescape(safe: &str) -> Option<String> {
    let bytes = safe.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = safe.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

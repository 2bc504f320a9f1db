//! Configuration management for wikimirror.
//!
//! Configuration is stored in TOML. Every section is optional and falls back
//! to defaults, so an empty file (or no file at all) is valid apart from the
//! site endpoint, which must come from the file, an endpoint file, or the
//! environment.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [site]
//! endpoint_file = "url.txt"     # or: endpoint = "https://example.org/api"
//!
//! [paths]
//! root = "Site History"
//!
//! [ignore]
//! prefixes = ["system:", "admin:", "nav:", "search:", "forum:"]
//! pages = ["start"]
//!
//! [retry]
//! attempts = 5
//! delay_ms = 2000
//! backoff = 2.0
//! max_delay_ms = 60000
//!
//! [fetch]
//! timeout_secs = 30
//! ```
//!
//! ## Environment Overrides
//!
//! - `WIKIMIRROR_CONFIG`: config file used by [`Config::load`]
//! - `WIKIMIRROR_DATA_DIR`: archive root
//! - `WIKIMIRROR_ENDPOINT`: site endpoint

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, PageIdentity, Result, RetryPolicy};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "WIKIMIRROR_CONFIG";
/// Environment variable overriding the archive root.
pub const DATA_DIR_ENV: &str = "WIKIMIRROR_DATA_DIR";
/// Environment variable overriding the site endpoint.
pub const ENDPOINT_ENV: &str = "WIKIMIRROR_ENDPOINT";

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the page-listing API lives.
    pub site: SiteConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Pages that are never mirrored.
    pub ignore: IgnoreRules,
    /// Retry budget for source operations.
    pub retry: RetryPolicy,
    /// HTTP client settings.
    pub fetch: FetchConfig,
}

/// Site access configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Endpoint URL given inline.
    pub endpoint: Option<String>,
    /// Local text file holding the endpoint URL, relative to the config file.
    pub endpoint_file: Option<PathBuf>,
}

/// Filesystem paths configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Archive root holding page directories, the ledger and the marker.
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: directories::ProjectDirs::from("dev", "outfitter", "wikimirror").map_or_else(
                || PathBuf::from("Site History"),
                |dirs| dirs.data_dir().join("archive"),
            ),
        }
    }
}

/// Page-name ignore rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreRules {
    /// Raw name prefixes to skip (case-insensitive), e.g. `system:`.
    pub prefixes: Vec<String>,
    /// Exact raw page names to skip (case-insensitive).
    pub pages: Vec<String>,
}

impl IgnoreRules {
    /// Whether the page is excluded from mirroring.
    #[must_use]
    pub fn is_ignored(&self, page: &PageIdentity) -> bool {
        let name = page.raw_name().to_lowercase();
        self.pages.iter().any(|p| p.to_lowercase() == name)
            || self
                .prefixes
                .iter()
                .any(|prefix| name.starts_with(&prefix.to_lowercase()))
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User agent override.
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl Config {
    /// Load from `WIKIMIRROR_CONFIG` or the platform config directory.
    ///
    /// A missing file yields defaults. Environment overrides are applied.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
            _ => Self::default_path()?,
        };

        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load an explicitly named config file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file is missing or malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        // Relative paths are relative to the config file, not the working directory
        if let Some(base) = path.parent() {
            if let Some(file) = config.site.endpoint_file.as_mut() {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
            if config.paths.root.is_relative() {
                config.paths.root = base.join(&config.paths.root);
            }
        }
        Ok(config)
    }

    /// Platform config file location.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("dev", "outfitter", "wikimirror")
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }

    /// Apply `WIKIMIRROR_DATA_DIR` and `WIKIMIRROR_ENDPOINT`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.paths.root = PathBuf::from(dir.trim());
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            self.site.endpoint = Some(endpoint.trim().to_string());
        }
    }

    /// Resolve the site endpoint from the inline value or the endpoint file.
    ///
    /// The endpoint file is read as its first non-empty line not starting
    /// with `#`. A trailing `/` is removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when neither source provides an endpoint.
    pub fn resolve_endpoint(&self) -> Result<String> {
        let endpoint = if let Some(endpoint) = &self.site.endpoint {
            endpoint.trim().to_string()
        } else if let Some(file) = &self.site.endpoint_file {
            let content = fs::read_to_string(file).map_err(|e| {
                Error::Config(format!(
                    "Failed to read endpoint file {}: {e}",
                    file.display()
                ))
            })?;
            content
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty() && !line.starts_with('#'))
                .map(ToString::to_string)
                .ok_or_else(|| {
                    Error::Config(format!("Endpoint file {} is empty", file.display()))
                })?
        } else {
            return Err(Error::Config(format!(
                "No site endpoint configured; set [site].endpoint, [site].endpoint_file or {ENDPOINT_ENV}"
            )));
        };

        if endpoint.is_empty() {
            return Err(Error::Config("Site endpoint is empty".into()));
        }
        Ok(endpoint.trim_end_matches('/').to_string())
    }
}

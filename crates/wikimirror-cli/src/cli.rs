//! # CLI Structure and Argument Parsing
//!
//! ```bash
//! # First run downloads everything; later runs only what changed
//! wikimirror sync
//!
//! # Force a mode
//! wikimirror sync --bulk
//! wikimirror sync --incremental --format json
//!
//! # Inspect
//! wikimirror plan
//! wikimirror status
//! wikimirror show start 3
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// Main CLI structure for the `wikimirror` command
#[derive(Parser, Clone, Debug)]
#[command(name = "wikimirror")]
#[command(version)]
#[command(about = "wikimirror - Incremental local mirror of a wiki's revision history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages (only show errors)
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file (defaults to `WIKIMIRROR_CONFIG` or the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Mirror every page that needs work
    Sync {
        /// Process every page not yet marked complete
        #[arg(long, conflicts_with = "incremental")]
        bulk: bool,

        /// Process only pages edited since the last full sync
        #[arg(long)]
        incremental: bool,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Mirror a single page
    Page {
        /// Page name as used on the site
        name: String,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show which pages a sync would process, without syncing
    Plan {
        /// Plan a bulk pass
        #[arg(long, conflicts_with = "incremental")]
        bulk: bool,

        /// Plan an incremental pass
        #[arg(long)]
        incremental: bool,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Summarize the local archive
    Status {
        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print one archived revision
    Show {
        /// Page name as used on the site
        name: String,

        /// Revision sequence number
        number: u32,

        /// Print only the metadata header
        #[arg(long)]
        metadata: bool,
    },
}

impl Commands {
    /// Output format selected for the command, if it has one.
    pub const fn format(&self) -> Option<OutputFormat> {
        match self {
            Self::Sync { format, .. }
            | Self::Page { format, .. }
            | Self::Plan { format, .. }
            | Self::Status { format } => Some(*format),
            Self::Show { .. } => None,
        }
    }
}

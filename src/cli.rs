//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::planner::SearchScope;

/// scour - local incremental file search
///
/// Crawls your chosen folders into a persistent full-text index over
/// filenames and sampled file content, and answers interactive queries.
#[derive(Parser, Debug)]
#[command(name = "scour")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Which fields a query searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScopeArg {
    Name,
    Content,
    Both,
}

impl From<ScopeArg> for SearchScope {
    fn from(scope: ScopeArg) -> SearchScope {
        match scope {
            ScopeArg::Name => SearchScope::Name,
            ScopeArg::Content => SearchScope::Content,
            ScopeArg::Both => SearchScope::Both,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl roots into the index (initial phase, then background)
    Index {
        /// Root directories to crawl (defaults to the current directory)
        roots: Vec<PathBuf>,

        /// Reindex every bucket instead of stopping at the last
        /// completed-crawl cutoff
        #[arg(long)]
        full: bool,

        /// Wipe the index first, then run a full crawl
        #[arg(long)]
        reset: bool,
    },

    /// Query the index
    #[command(alias = "s")]
    Search {
        /// Query text: bare terms, "quoted phrases", ext:pdf filters and
        /// OR between clauses
        query: String,

        /// Fields to search
        #[arg(short, long, default_value = "both")]
        scope: ScopeArg,

        /// Glob post-filter on the full path (* ? **, case-insensitive)
        #[arg(short, long)]
        glob: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Re-sort results by modification time, newest first
        #[arg(long)]
        sort_modified: bool,
    },

    /// Show index statistics and crawl state
    Status,

    /// Delete the on-disk index
    Reset,
}

//! Error types with helpful suggestions
//!
//! Provides user-facing error messages plus the I/O failure
//! classification used by the crawl pipeline's logging policy.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Error indicating the on-disk index could not be opened as a valid index.
///
/// Recovery is reset-and-rebuild; `Engine::open` performs it automatically.
#[derive(Debug)]
pub struct IndexCorruptionError {
    pub index_dir: PathBuf,
    pub detail: String,
}

impl fmt::Display for IndexCorruptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Search index at '{}' is corrupt or unreadable: {}\n\n\
             Suggestion: Reset the index and run a full crawl.\n\
             Example: scour reset && scour index --full",
            self.index_dir.display(),
            self.detail
        )
    }
}

impl std::error::Error for IndexCorruptionError {}

/// How an I/O error should be treated by the crawl pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailure {
    /// Skip the file, log at debug, keep crawling.
    Transient,
    /// Abandon the enclosing unit of work, log at warn.
    Permanent,
}

/// Classify an I/O error. Files vanishing mid-crawl and interrupted reads
/// are everyday noise; permission problems and device errors are not.
pub fn io_failure(err: &io::Error) -> IoFailure {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound | Interrupted | WouldBlock | TimedOut | UnexpectedEof => IoFailure::Transient,
        _ => IoFailure::Permanent,
    }
}

/// Walk an error chain and decide the pipeline log level for a per-file
/// failure. Errors with no I/O cause are treated as transient.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .next()
        .map(|io_err| io_failure(io_err) == IoFailure::Transient)
        .unwrap_or(true)
}

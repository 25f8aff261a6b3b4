//! Error types for eluent-jsonl operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The error type for eluent-jsonl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error occurred while reading or writing.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    ///
    /// Parse failures on individual lines are *not* reported through this
    /// variant; the resilient reader downgrades them to [`LineWarning`]s.
    ///
    /// [`LineWarning`]: crate::reader::LineWarning
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Could not acquire the advisory lock within the bounded wait.
    #[error("could not lock {path} within {waited_ms} ms")]
    LockContention {
        /// The file that stayed locked.
        path: PathBuf,
        /// How long we waited before giving up.
        waited_ms: u64,
    },
}

/// A specialized Result type for eluent-jsonl operations.
pub type Result<T> = std::result::Result<T, Error>;

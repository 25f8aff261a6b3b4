//! Error types for core eluent operations.
//!
//! Sync- and git-specific errors live in [`crate::sync::SyncError`]; this
//! enum covers the record store, graph, readiness, id resolution, and merge
//! layers.

use crate::domain::{AtomId, Status};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The error type for core eluent operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No record matched the given id or prefix.
    #[error("not found: {0}")]
    NotFound(String),

    /// A prefix matched more than one id.
    ///
    /// The candidates ride along so callers can present them instead of a
    /// bare failure.
    #[error("ambiguous id '{input}': {} candidates", candidates.len())]
    Ambiguous {
        /// The user-supplied input after normalization.
        input: String,
        /// Every full id the input matched.
        candidates: Vec<AtomId>,
    },

    /// The atom is already claimed by another agent.
    #[error("already claimed by {owner}")]
    Conflict {
        /// The agent currently holding the claim.
        owner: String,
    },

    /// The operation is not legal from the atom's current status.
    #[error("invalid state: atom is {current}")]
    InvalidState {
        /// The status that rejected the operation.
        current: Status,
    },

    /// The request was structurally invalid (bad field, missing argument).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Adding the bond would create a blocking cycle.
    ///
    /// The path starts and ends at the same atom and visits each other
    /// atom at most once.
    #[error("cycle detected: {}", format_cycle(path))]
    CycleDetected {
        /// The offending path, in traversal order.
        path: Vec<AtomId>,
    },

    /// Input data failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The `.eluent` directory does not exist here.
    #[error("not an eluent repository (no .eluent directory at {0})")]
    NotInitialized(PathBuf),

    /// The `.eluent` directory already exists.
    #[error("eluent is already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    /// A record with this identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file failed to parse.
    #[error("failed to parse config: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Error from the JSONL persistence layer.
    #[error(transparent)]
    Jsonl(#[from] eluent_jsonl::Error),
}

fn format_cycle(path: &[AtomId]) -> String {
    path.iter()
        .map(AtomId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A specialized Result type for core eluent operations.
pub type Result<T> = std::result::Result<T, Error>;

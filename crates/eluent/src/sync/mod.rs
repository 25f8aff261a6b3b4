//! Git-mediated synchronization: the pull-first sync orchestrator, the
//! ledger branch subsystem, and their shared git plumbing.
//!
//! Two branches carry eluent state. The *main* branch holds
//! `.eluent/data.jsonl` alongside the code; the sync orchestrator
//! reconciles it with the remote through the three-way merge engine. The
//! *ledger* branch is an orphan branch carrying only `.eluent/` contents;
//! it absorbs high-frequency claim commits so they never pollute project
//! history, and its linear history is the total order of claims.

pub mod git;
pub mod ledger;
pub mod orchestrator;
pub mod state;

pub use git::{validate_branch_name, Git};
pub use ledger::{ClaimOutcome, LedgerConfig, LedgerStatus, LedgerSyncer};
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncOutcome, SyncState};
pub use state::{LedgerState, LedgerStateStore, LEDGER_STATE_SCHEMA, MAX_OFFLINE_CLAIMS};

use std::io;
use thiserror::Error;

/// The error type for sync and ledger operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository has no git remote to sync against.
    #[error("no git remote configured")]
    NoRemote,

    /// A git command exited non-zero.
    #[error("`{command}` failed{}: {stderr}", exit.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    GitFailed {
        /// The command line that failed.
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Exit code, when the process exited normally.
        exit: Option<i32>,
    },

    /// A git network operation exceeded its timeout.
    ///
    /// Distinct from [`SyncError::GitFailed`] so the claim retry loop can
    /// treat timeouts as push failures.
    #[error("`{command}` timed out after {seconds}s")]
    GitTimeout {
        /// The command line that timed out.
        command: String,
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// A branch name failed `check-ref-format` rules.
    #[error("invalid branch name: {0}")]
    BranchInvalid(String),

    /// The ledger worktree is missing or unusable and could not be fixed.
    #[error("worktree error: {0}")]
    Worktree(String),

    /// A ledger operation was requested but `sync.ledger_branch` is unset.
    #[error("ledger sync is not configured (set sync.ledger_branch)")]
    LedgerNotConfigured,

    /// The claim loop exhausted its retries.
    #[error("claim failed after {attempts} attempts")]
    MaxRetriesExceeded {
        /// How many attempts were made.
        attempts: u32,
    },

    /// Another sync already holds the sync lock.
    #[error("another sync is already in progress")]
    SyncInProgress,

    /// Persistent state was newer than this build understands.
    #[error("state schema {found} is newer than supported {supported}; upgrade eluent")]
    UpgradeRequired {
        /// Schema version found on disk.
        found: u32,
        /// Highest schema version this build reads.
        supported: u32,
    },

    /// An error from the core layer (store, merge, ids).
    #[error(transparent)]
    Core(#[from] crate::error::Error),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

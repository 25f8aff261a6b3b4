//! Daemon error types and the wire error-code mapping.

use eluent::sync::SyncError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error type for daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A frame's declared length exceeded the protocol maximum.
    #[error("message of {declared} bytes exceeds the {max} byte limit")]
    MessageTooLarge {
        /// The length prefix the peer sent.
        declared: u32,
        /// The protocol maximum.
        max: u32,
    },

    /// The frame body was not a valid request/response object.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Another daemon instance already owns the socket.
    #[error("daemon already running (socket {0} is live)")]
    AlreadyRunning(String),

    /// The request named a command this daemon does not implement.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A required argument was missing or mistyped.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Ledger coordination is configured but unreachable, and
    /// `offline_mode=fail` forbids local fallback.
    #[error("ledger unavailable and offline_mode is fail")]
    LedgerUnavailable,

    /// An error from the core layer.
    #[error(transparent)]
    Core(#[from] eluent::Error),

    /// An error from the sync layer.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// The error payload of a wire response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (stable; scripts branch on this).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured extras: ambiguity candidates, cycle paths, owners.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Map a daemon error onto its wire code and details.
    #[must_use]
    pub fn from_error(error: &DaemonError) -> Self {
        let (code, details) = classify(error);
        Self {
            code: code.to_string(),
            message: error.to_string(),
            details,
        }
    }
}

fn classify(error: &DaemonError) -> (&'static str, Option<serde_json::Value>) {
    use eluent::Error as Core;

    match error {
        DaemonError::MessageTooLarge { .. } => ("message_too_large", None),
        DaemonError::Protocol(_) => ("protocol_error", None),
        DaemonError::AlreadyRunning(_) => ("internal", None),
        DaemonError::UnknownCommand(_) | DaemonError::InvalidRequest(_) => {
            ("invalid_request", None)
        }
        DaemonError::LedgerUnavailable => ("ledger_error", None),
        DaemonError::Io(_) | DaemonError::Json(_) => ("internal", None),

        DaemonError::Core(core) => match core {
            Core::NotFound(_) => ("not_found", None),
            Core::Ambiguous { candidates, .. } => (
                "ambiguous",
                Some(serde_json::json!({
                    "candidates": candidates.iter().map(ToString::to_string).collect::<Vec<_>>()
                })),
            ),
            Core::Conflict { owner } => {
                ("conflict", Some(serde_json::json!({ "owner": owner })))
            }
            Core::InvalidState { current } => (
                "invalid_state",
                Some(serde_json::json!({ "current": current.to_string() })),
            ),
            Core::InvalidRequest(_) | Core::Validation(_) => ("invalid_request", None),
            Core::CycleDetected { path } => (
                "cycle",
                Some(serde_json::json!({
                    "path": path.iter().map(ToString::to_string).collect::<Vec<_>>()
                })),
            ),
            Core::NotInitialized(_) => ("not_initialized", None),
            Core::AlreadyInitialized(_) => ("already_initialized", None),
            _ => ("internal", None),
        },

        DaemonError::Sync(sync) => match sync {
            SyncError::NoRemote => ("no_remote", None),
            SyncError::GitFailed { .. } => ("git_failed", None),
            SyncError::GitTimeout { .. } => ("git_timeout", None),
            SyncError::BranchInvalid(_) => ("branch_invalid", None),
            SyncError::Worktree(_) => ("worktree_error", None),
            SyncError::LedgerNotConfigured => ("ledger_not_configured", None),
            SyncError::MaxRetriesExceeded { .. } => ("max_retries", None),
            SyncError::SyncInProgress => ("sync_in_progress", None),
            SyncError::UpgradeRequired { .. } => ("state_corrupt", None),
            SyncError::Core(_) | SyncError::Io(_) | SyncError::Json(_) => ("internal", None),
        },
    }
}

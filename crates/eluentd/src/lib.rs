//! Eluentd — the local RPC daemon for eluent work tracking.
//!
//! Long-running, one instance per user. Serves length-prefixed JSON
//! frames over a Unix domain socket under the user data directory, caches
//! per-repository state, and mediates claims through the ledger syncer
//! (with a local-plus-queue fallback when the remote is unreachable).

#![forbid(unsafe_code)]

pub mod client;
pub mod context;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use context::DaemonContext;
pub use error::{DaemonError, ErrorBody, Result};
pub use protocol::{Request, Response, MAX_FRAME_BYTES};
pub use server::Daemon;

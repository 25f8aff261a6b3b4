//! Eluent — dependency-graph work tracking for cooperating agents,
//! coordinated through git.
//!
//! Work items ("atoms") and their typed relationships ("bonds") persist as
//! JSON Lines in `.eluent/` alongside code. Agents discover ready work
//! through the dependency graph, claim it atomically through an orphan
//! ledger branch, and reconcile divergent clones with a three-way merge
//! engine. No coordination server beyond git is assumed.
//!
//! Layer map, leaves first:
//!
//! - [`id`] — time-ordered, prefix-addressable identifiers.
//! - [`domain`] — atoms, bonds, comments, and the behavior registries.
//! - [`store`] — the durable record store (append + atomic rewrite).
//! - [`graph`] / [`ready`] — the typed DAG and the readiness calculator.
//! - [`merge`] — the three-way snapshot merge engine.
//! - [`sync`] — git plumbing, the pull-first orchestrator, and the
//!   ledger branch subsystem.
//! - [`config`] — repository configuration and per-user context.

#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod id;
pub mod merge;
pub mod ready;
pub mod store;
pub mod sync;

pub use config::{EluentConfig, UserContext};
pub use error::{Error, Result};
pub use store::RecordStore;

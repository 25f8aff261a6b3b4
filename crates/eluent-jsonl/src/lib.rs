//! Resilient JSONL (JSON Lines) persistence primitives.
//!
//! Eluent stores its records as JSON Lines files that live in git alongside
//! code, so the reading side has to survive whatever merges, partial writes,
//! and hand edits do to those files. This crate provides the three write
//! disciplines and one read discipline the record store is built on:
//!
//! - [`read_resilient`] — parse every line it can, skip and report the rest.
//! - [`append_locked`] — append new lines under an exclusive advisory lock,
//!   fsync before releasing.
//! - [`rewrite_atomic`] — replace a file's full contents via temp file +
//!   fsync + rename, so readers never observe a half-written file.
//! - [`FileLock`] — a scoped advisory-lock guard with a bounded wait.
//!
//! # Examples
//!
//! ```no_run
//! use eluent_jsonl::{append_locked, read_resilient};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Entry {
//!     id: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! append_locked(
//!     "data.jsonl",
//!     &[Entry { id: "a".into() }],
//!     Duration::from_secs(2),
//! )?;
//!
//! let (entries, warnings) = read_resilient::<Entry>("data.jsonl").await?;
//! assert!(warnings.is_empty());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod atomic;
pub mod error;
pub mod lock;
pub mod reader;
pub mod writer;

pub use atomic::rewrite_atomic;
pub use error::{Error, Result};
pub use lock::FileLock;
pub use reader::{read_resilient, LineWarning};
pub use writer::{append_locked, JsonlWriter};

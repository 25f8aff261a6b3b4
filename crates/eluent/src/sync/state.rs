//! Persistent ledger-sync metadata.
//!
//! One small JSON file per repository under the user data root records
//! pull/push heads and the queue of offline claims. Writes go through a
//! temp-file rename under a *sibling* lock file — readers may have the
//! state file itself open while a writer renames over it, so the lock
//! cannot live on the data file.
//!
//! Corruption is never fatal: a state file that fails to parse resets to
//! defaults with a warning. The one hard failure is a schema version newer
//! than this build, which means a newer eluent wrote the file.

use super::{Result, SyncError};
use crate::domain::OfflineClaim;
use chrono::{DateTime, Utc};
use eluent_jsonl::FileLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Highest state schema this build reads and writes.
pub const LEDGER_STATE_SCHEMA: u32 = 1;

/// Bound on the offline-claim queue; oldest entries drop first.
pub const MAX_OFFLINE_CLAIMS: usize = 1000;

/// How long state-file lock acquisition waits.
const LOCK_WAIT: Duration = Duration::from_secs(2);

/// The persisted ledger-sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Schema version of this file.
    pub schema_version: u32,
    /// Last successful ledger pull.
    pub last_pull_at: Option<DateTime<Utc>>,
    /// Last successful ledger push.
    pub last_push_at: Option<DateTime<Utc>>,
    /// The ledger head SHA after the last successful operation.
    pub ledger_head: Option<String>,
    /// Cleared when the worktree is detected stale; set on recovery.
    pub valid: bool,
    /// Claims made while offline, awaiting reconciliation.
    pub offline_claims: Vec<OfflineClaim>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_STATE_SCHEMA,
            last_pull_at: None,
            last_push_at: None,
            ledger_head: None,
            valid: true,
            offline_claims: Vec::new(),
        }
    }
}

/// Reads and writes [`LedgerState`] with locking and atomic replacement.
#[derive(Debug, Clone)]
pub struct LedgerStateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LedgerStateStore {
    /// A store over the given state and lock paths (see
    /// [`crate::config::UserContext::ledger_state_path`]).
    #[must_use]
    pub fn new(state_path: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            state_path,
            lock_path,
        }
    }

    /// Load the state, resetting to defaults on corruption.
    ///
    /// # Errors
    ///
    /// [`SyncError::UpgradeRequired`] when the file's schema is newer than
    /// this build; IO errors other than absence.
    pub fn load(&self) -> Result<LedgerState> {
        let text = match std::fs::read_to_string(&self.state_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LedgerState::default())
            }
            Err(e) => return Err(e.into()),
        };

        let state: LedgerState = match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    path = %self.state_path.display(),
                    error = %e,
                    "ledger state corrupt; resetting to defaults"
                );
                return Ok(LedgerState::default());
            }
        };

        if state.schema_version > LEDGER_STATE_SCHEMA {
            return Err(SyncError::UpgradeRequired {
                found: state.schema_version,
                supported: LEDGER_STATE_SCHEMA,
            });
        }
        Ok(state)
    }

    /// Persist the state: lock, write temp, fsync, rename.
    ///
    /// # Errors
    ///
    /// Lock contention and IO errors.
    pub fn save(&self, state: &LedgerState) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = FileLock::acquire_exclusive(&self.lock_path, LOCK_WAIT)
            .map_err(crate::error::Error::Jsonl)
            .map_err(SyncError::Core)?;

        let temp_path = self.state_path.with_extension("tmp");
        let text = serde_json::to_string_pretty(state)?;
        if let Err(e) = write_and_sync(&temp_path, &text) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
        std::fs::rename(&temp_path, &self.state_path)?;
        Ok(())
    }

    /// Append an offline claim, dropping the oldest entries past the
    /// bound, and persist.
    ///
    /// # Errors
    ///
    /// As [`LedgerStateStore::save`].
    pub fn record_offline_claim(&self, claim: OfflineClaim) -> Result<LedgerState> {
        let mut state = self.load()?;
        state.offline_claims.push(claim);
        if state.offline_claims.len() > MAX_OFFLINE_CLAIMS {
            let overflow = state.offline_claims.len() - MAX_OFFLINE_CLAIMS;
            tracing::warn!(
                dropped = overflow,
                "offline claim queue overflow; dropping oldest entries"
            );
            state.offline_claims.drain(..overflow);
        }
        self.save(&state)?;
        Ok(state)
    }

    /// Keep only the offline claims the predicate accepts, and persist.
    ///
    /// Reconciliation uses this to drop claims that pushed cleanly while
    /// retaining the ones that surfaced conflicts.
    ///
    /// # Errors
    ///
    /// As [`LedgerStateStore::save`].
    pub fn retain_offline_claims<F>(&self, mut keep: F) -> Result<LedgerState>
    where
        F: FnMut(&OfflineClaim) -> bool,
    {
        let mut state = self.load()?;
        state.offline_claims.retain(|claim| keep(claim));
        self.save(&state)?;
        Ok(state)
    }

    /// Remove the state file (teardown).
    ///
    /// # Errors
    ///
    /// IO errors other than absence.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.state_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_and_sync(path: &std::path::Path, text: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

//! Pull-first bidirectional sync over the main branch.
//!
//! The flow is fetch → three-way merge against the recorded base → atomic
//! local rewrite (with backup) → commit and push. The remote is never
//! rewritten without merging first, and the sync state file only advances
//! after the push lands, so a failed push simply re-merges next time.

use super::{Git, Result, SyncError};
use crate::domain::Status;
use crate::merge::{self, Conflict};
use crate::store::{RecordStore, Snapshot, DATA_FILE, ELUENT_DIR};
use chrono::{DateTime, Utc};
use eluent_jsonl::FileLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sync state file name inside `.eluent/`.
pub const SYNC_STATE_FILE: &str = ".sync-state";

/// Sync lock file name inside `.eluent/`.
pub const SYNC_LOCK_FILE: &str = ".sync.lock";

/// Options for one sync invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Merge and rewrite locally, but do not commit or push.
    pub pull_only: bool,
    /// Skip fetch and merge; just commit the data file and push.
    pub push_only: bool,
    /// Report the merge result without mutating anything.
    pub dry_run: bool,
    /// Commit even when in-progress atoms are present in the merge.
    pub force: bool,
}

/// What a sync invocation did.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Local and remote heads already agree.
    UpToDate,
    /// A merge was applied.
    Synced {
        /// Divergences the merge had to decide.
        conflicts: Vec<Conflict>,
        /// Malformed lines skipped while reading historical snapshots.
        skipped_lines: usize,
        /// Whether a commit was created.
        committed: bool,
        /// Whether the commit was pushed.
        pushed: bool,
        /// True when in-progress atoms suppressed the commit (no
        /// `force`).
        held_back: bool,
    },
    /// Dry run: the merge result, with nothing written.
    DryRun {
        /// Divergences the merge would decide.
        conflicts: Vec<Conflict>,
        /// Whether applying the merge would change local data.
        would_change: bool,
    },
    /// `push_only`: committed (if needed) and pushed.
    Pushed {
        /// Whether a commit was created (false when already clean).
        committed: bool,
    },
}

/// Persisted sync orchestrator state (`.eluent/.sync-state`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// When the last successful sync finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// The merge base for the next sync (the remote head last merged).
    pub base_commit: Option<String>,
    /// Local head at the end of the last sync.
    pub local_head: Option<String>,
    /// Remote head at the end of the last sync.
    pub remote_head: Option<String>,
}

impl SyncState {
    fn path(repo_root: &Path) -> PathBuf {
        repo_root.join(ELUENT_DIR).join(SYNC_STATE_FILE)
    }

    /// Load the sync state; absence and corruption both read as empty.
    #[must_use]
    pub fn load(repo_root: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(Self::path(repo_root)) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "sync state corrupt; starting fresh");
            Self::default()
        })
    }

    /// Persist via temp-file rename.
    ///
    /// # Errors
    ///
    /// IO and serialization errors.
    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let path = Self::path(repo_root);
        let temp = path.with_extension("tmp");
        std::fs::write(&temp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }
}

/// Orchestrates pull-first sync for one repository.
pub struct SyncOrchestrator {
    repo_root: PathBuf,
    store: RecordStore,
    git: Git,
    remote: String,
}

impl SyncOrchestrator {
    /// An orchestrator over the repository's store, pushing to `origin`.
    #[must_use]
    pub fn new(repo_root: PathBuf, store: RecordStore, git: Git) -> Self {
        Self {
            repo_root,
            store,
            git,
            remote: "origin".to_string(),
        }
    }

    /// Use a remote other than `origin`.
    #[must_use]
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Run one sync.
    ///
    /// # Errors
    ///
    /// [`SyncError::SyncInProgress`] when another sync holds the lock,
    /// [`SyncError::NoRemote`], git/network failures, and IO errors. When
    /// the local rewrite fails partway, the previous data file is restored
    /// before the error propagates.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncOutcome> {
        let lock_path = self.repo_root.join(ELUENT_DIR).join(SYNC_LOCK_FILE);
        let _lock = FileLock::try_exclusive(&lock_path).map_err(|_| SyncError::SyncInProgress)?;

        if !self.git.has_remote().await? {
            return Err(SyncError::NoRemote);
        }

        if options.push_only {
            return self.push_only().await;
        }
        self.pull_first(options).await
    }

    async fn push_only(&self) -> Result<SyncOutcome> {
        let committed = self.commit_data("eluent: push local records").await?;
        let branch = self.current_branch().await?;
        self.git.push(&self.remote, &branch).await?;
        Ok(SyncOutcome::Pushed { committed })
    }

    async fn pull_first(&self, options: SyncOptions) -> Result<SyncOutcome> {
        let branch = self.current_branch().await?;
        let data_rel = format!("{ELUENT_DIR}/{DATA_FILE}");

        // Fetch, tolerating a remote that has never seen this branch.
        let remote_head = match self.git.fetch(&self.remote, &branch).await {
            Ok(()) => {
                self.git
                    .rev_parse(&format!("{}/{branch}", self.remote))
                    .await?
            }
            Err(SyncError::GitFailed { stderr, .. })
                if stderr.contains("couldn't find remote ref") =>
            {
                None
            }
            Err(e) => return Err(e),
        };
        let local_head = self.git.rev_parse("HEAD").await?;

        let mut state = SyncState::load(&self.repo_root);
        let base_commit = match &state.base_commit {
            Some(sha) if self.git.rev_parse(sha).await?.is_some() => Some(sha.clone()),
            _ => match (&local_head, &remote_head) {
                (Some(local), Some(remote)) => self.git.merge_base(local, remote).await?,
                _ => None,
            },
        };

        let data_dirty = self
            .git
            .status_porcelain()
            .await?
            .lines()
            .any(|line| line.ends_with(&data_rel));

        if remote_head.is_some()
            && remote_head == local_head
            && state.base_commit.is_some()
            && !data_dirty
        {
            return Ok(SyncOutcome::UpToDate);
        }

        // Three snapshots: recorded base, current working data, remote.
        let mut skipped_lines = 0usize;
        let base_snapshot = match &base_commit {
            Some(sha) => {
                let (snapshot, skipped) = self.snapshot_at(sha, &data_rel).await?;
                skipped_lines += skipped;
                snapshot
            }
            None => Snapshot::empty(),
        };
        let remote_snapshot = match &remote_head {
            Some(sha) => {
                let (snapshot, skipped) = self.snapshot_at(sha, &data_rel).await?;
                skipped_lines += skipped;
                snapshot
            }
            None => Snapshot::empty(),
        };
        let local_snapshot = self.store.synced_snapshot().await;

        let outcome = merge::merge(&base_snapshot, &local_snapshot, &remote_snapshot);
        let would_change = outcome.snapshot != local_snapshot;

        if options.dry_run {
            return Ok(SyncOutcome::DryRun {
                conflicts: outcome.conflicts,
                would_change,
            });
        }

        if would_change {
            self.apply_with_backup(outcome.snapshot.clone()).await?;
        }

        let mut committed = false;
        let mut pushed = false;
        let mut held_back = false;

        if !options.pull_only {
            let dirty = data_dirty
                || self
                    .git
                    .status_porcelain()
                    .await?
                    .lines()
                    .any(|line| line.ends_with(&data_rel));

            if dirty {
                let in_progress: Vec<String> = outcome
                    .snapshot
                    .atoms
                    .values()
                    .filter(|a| a.status == Status::InProgress)
                    .map(|a| a.id.to_string())
                    .collect();

                if !in_progress.is_empty() && !options.force {
                    tracing::warn!(
                        atoms = ?in_progress,
                        "in-progress atoms present; holding back sync commit (use force to override)"
                    );
                    held_back = true;
                } else {
                    committed = self.commit_data("eluent: sync records").await?;
                }
            }

            if committed {
                // A failed push leaves the state file untouched, so the
                // next sync re-merges from the same base.
                self.git.push(&self.remote, &branch).await?;
                pushed = true;
            }
        }

        let final_local_head = self.git.rev_parse("HEAD").await?;
        // Once a push lands, the remote head is our own commit; recording
        // the pre-push head as base would make the next merge read our own
        // edits as remote conflicts.
        let final_remote_head = if pushed {
            final_local_head.clone()
        } else {
            remote_head
        };

        state.last_sync_at = Some(Utc::now());
        state.base_commit = final_remote_head.clone();
        state.local_head = final_local_head;
        state.remote_head = final_remote_head;
        state.save(&self.repo_root)?;

        Ok(SyncOutcome::Synced {
            conflicts: outcome.conflicts,
            skipped_lines,
            committed,
            pushed,
            held_back,
        })
    }

    async fn snapshot_at(&self, commit: &str, data_rel: &str) -> Result<(Snapshot, usize)> {
        match self.git.show_file(commit, data_rel).await? {
            Some(text) => {
                let (snapshot, _, skipped) = Snapshot::parse_jsonl(&text);
                Ok((snapshot, skipped))
            }
            None => Ok((Snapshot::empty(), 0)),
        }
    }

    /// Rewrite the data file from the merged snapshot, restoring the
    /// previous contents if anything fails.
    async fn apply_with_backup(&self, merged: Snapshot) -> Result<()> {
        let data_path = self.repo_root.join(ELUENT_DIR).join(DATA_FILE);
        let backup_path = data_path.with_extension("jsonl.bak");
        tokio::fs::copy(&data_path, &backup_path).await?;

        match self.store.replace_synced(merged).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&backup_path).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "merge rewrite failed; restoring backup");
                tokio::fs::copy(&backup_path, &data_path).await?;
                let _ = tokio::fs::remove_file(&backup_path).await;
                self.store.reload().await?;
                Err(e.into())
            }
        }
    }

    async fn commit_data(&self, message: &str) -> Result<bool> {
        let data_rel = format!("{ELUENT_DIR}/{DATA_FILE}");
        self.git.commit_paths(&[&data_rel], message).await
    }

    async fn current_branch(&self) -> Result<String> {
        self.git.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }
}

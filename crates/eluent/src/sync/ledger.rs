//! The ledger branch subsystem: atomic multi-agent claims over git.
//!
//! A dedicated orphan branch (default `eluent-sync`) carries only the
//! `.eluent/` tree. It shares no history with the main branch, so
//! high-frequency claim commits never appear in project history, and its
//! linear commit order *is* the total order of claims. A private worktree
//! under the user data root keeps ledger operations out of the user's
//! checkout.
//!
//! Claims are optimistic: pull (hard reset to the remote — the branch is
//! authoritative), mutate the data file, commit, push. A rejected push
//! means someone else claimed first; the loop backs off with jitter and
//! retries from the pull, where the competing claim is now visible and
//! turns into a clean [`ClaimOutcome::Conflict`].

use super::state::{LedgerState, LedgerStateStore};
use super::{validate_branch_name, Git, Result, SyncError};
use crate::config::{EluentConfig, UserContext};
use crate::domain::{AtomId, Status};
use crate::error::Error as CoreError;
use crate::store::{RecordStore, ELUENT_DIR, EPHEMERAL_FILE};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base backoff between claim retries, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 100;

/// Backoff ceiling, in milliseconds.
pub const BACKOFF_MAX_MS: u64 = 5000;

/// How many released ids a stale-claim commit message lists in full.
const STALE_MESSAGE_LIMIT: usize = 5;

/// Configuration for one repository's ledger syncer.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// The orphan branch carrying claim state.
    pub branch: String,
    /// The git remote coordinating agents.
    pub remote: String,
    /// Claim-loop retry cap (clamped 1..=100).
    pub max_retries: u32,
    /// Push after each claim.
    pub auto_push: bool,
    /// Timeout for git network operations.
    pub network_timeout: Duration,
    /// Stale-claim auto-release threshold, if configured.
    pub claim_timeout: Option<Duration>,
}

impl LedgerConfig {
    /// A config with defaults for everything but the branch.
    #[must_use]
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            remote: "origin".to_string(),
            max_retries: 5,
            auto_push: true,
            network_timeout: Duration::from_secs(30),
            claim_timeout: None,
        }
    }

    /// Derive from repository configuration; `None` when
    /// `sync.ledger_branch` is unset (ledger coordination disabled).
    #[must_use]
    pub fn from_config(config: &EluentConfig) -> Option<Self> {
        let branch = config.sync.ledger_branch.clone()?;
        Some(Self {
            branch,
            remote: "origin".to_string(),
            max_retries: config.sync.claim_retries.clamp(1, 100),
            auto_push: config.sync.auto_claim_push,
            network_timeout: config.network_timeout(),
            claim_timeout: config.claim_timeout(),
        })
    }
}

/// Result of one claim attempt through the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// The claim landed (or was already ours).
    Success {
        /// How many push retries were consumed.
        retries: u32,
    },
    /// Another agent holds the claim.
    Conflict {
        /// The holding agent.
        owner: String,
    },
    /// The atom cannot be claimed (closed, discarded, blocked, abstract).
    Rejected {
        /// Why the claim was refused.
        reason: String,
    },
    /// The push kept failing until the retry cap.
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
    },
}

/// Health summary for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatus {
    /// The configured branch name.
    pub branch: String,
    /// Branch exists (locally or remotely) and the worktree is registered.
    pub available: bool,
    /// The remote advertises the ledger branch.
    pub online: bool,
    /// Available and not stale.
    pub healthy: bool,
    /// Last successful pull.
    pub last_pull_at: Option<DateTime<Utc>>,
    /// Last successful push.
    pub last_push_at: Option<DateTime<Utc>>,
    /// Ledger head after the last operation.
    pub ledger_head: Option<String>,
    /// Queued offline claims awaiting reconciliation.
    pub offline_claims: usize,
}

/// Manages the orphan ledger branch and its worktree for one repository.
#[derive(Debug)]
pub struct LedgerSyncer {
    repo_root: PathBuf,
    config: LedgerConfig,
    worktree: PathBuf,
    repo_git: Git,
    state: LedgerStateStore,
}

impl LedgerSyncer {
    /// Build a syncer; validates the branch name immediately.
    ///
    /// # Errors
    ///
    /// [`SyncError::BranchInvalid`] for a bad branch name.
    pub fn new(repo_root: PathBuf, config: LedgerConfig, user: &UserContext) -> Result<Self> {
        validate_branch_name(&config.branch)?;
        let worktree = user.worktree_path(&repo_root);
        let state = LedgerStateStore::new(
            user.ledger_state_path(&repo_root),
            user.ledger_lock_path(&repo_root),
        );
        let repo_git = Git::new(&repo_root).with_network_timeout(config.network_timeout);
        Ok(Self {
            repo_root,
            config,
            worktree,
            repo_git,
            state,
        })
    }

    /// The worktree directory this syncer manages.
    #[must_use]
    pub fn worktree_path(&self) -> &Path {
        &self.worktree
    }

    /// The configured branch.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.config.branch
    }

    /// The ledger state store.
    #[must_use]
    pub fn state_store(&self) -> &LedgerStateStore {
        &self.state
    }

    // ---- Setup / teardown ----------------------------------------------

    /// Ensure the ledger branch and worktree exist, creating both when
    /// absent. On first creation the main checkout's `.eluent/` seeds the
    /// ledger.
    ///
    /// # Errors
    ///
    /// Branch validation, git, and IO failures.
    pub async fn setup(&self) -> Result<()> {
        validate_branch_name(&self.config.branch)?;
        if let Some(parent) = self.worktree.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.ensure_branch().await?;
        self.ensure_worktree().await?;

        let mut state = self.state.load()?;
        state.valid = true;
        state.ledger_head = self.worktree_git().rev_parse("HEAD").await?;
        self.state.save(&state)?;
        Ok(())
    }

    /// Remove the worktree and local state files. The branch itself —
    /// local and remote — is left alone.
    ///
    /// # Errors
    ///
    /// IO failures; git failures removing the worktree are logged and
    /// then recovered by force-deleting the directory.
    pub async fn teardown(&self) -> Result<()> {
        if let Err(e) = self.repo_git.worktree_remove(&self.worktree).await {
            tracing::debug!(error = %e, "worktree remove failed; deleting directory directly");
        }
        let _ = self.repo_git.worktree_prune().await;
        if self.worktree.exists() {
            std::fs::remove_dir_all(&self.worktree)?;
        }
        self.state.delete()?;
        Ok(())
    }

    // ---- Health ---------------------------------------------------------

    /// Branch exists (locally or remotely) and the worktree is registered.
    ///
    /// # Errors
    ///
    /// Git spawn failures.
    pub async fn available(&self) -> Result<bool> {
        let branch_ref = format!("refs/heads/{}", self.config.branch);
        let local = self.repo_git.rev_parse(&branch_ref).await?.is_some();
        let remote = if local {
            true
        } else {
            self.repo_git
                .ls_remote_branch(&self.config.remote, &self.config.branch)
                .await?
                .is_some()
        };
        Ok((local || remote) && self.worktree_registered().await?)
    }

    /// The remote advertises the ledger branch right now.
    ///
    /// # Errors
    ///
    /// Git spawn failures; unreachable remotes read as offline.
    pub async fn online(&self) -> Result<bool> {
        match self
            .repo_git
            .ls_remote_branch(&self.config.remote, &self.config.branch)
            .await
        {
            Ok(sha) => Ok(sha.is_some()),
            Err(SyncError::GitTimeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Available and the worktree is not stale.
    ///
    /// # Errors
    ///
    /// Git spawn failures.
    pub async fn healthy(&self) -> Result<bool> {
        Ok(self.available().await? && !self.is_stale().await?)
    }

    /// Whether the worktree needs recovery: directory missing, git link
    /// broken, or attached to the wrong branch.
    ///
    /// # Errors
    ///
    /// Git spawn failures.
    pub async fn is_stale(&self) -> Result<bool> {
        if !self.worktree.is_dir() {
            return Ok(true);
        }

        // A worktree's .git is a file pointing back into the parent repo;
        // a missing or unreadable link means the registration is broken.
        let git_link = self.worktree.join(".git");
        match std::fs::read_to_string(&git_link) {
            Ok(contents) => {
                let Some(gitdir) = contents.trim().strip_prefix("gitdir: ") else {
                    return Ok(true);
                };
                if !Path::new(gitdir).exists() {
                    return Ok(true);
                }
            }
            Err(_) => return Ok(true),
        }

        let expected = format!("refs/heads/{}", self.config.branch);
        let attached = self
            .worktree_git()
            .run_ok(&["symbolic-ref", "--quiet", "HEAD"])
            .await?;
        Ok(attached.as_deref() != Some(expected.as_str()))
    }

    /// Status summary for reporting.
    ///
    /// # Errors
    ///
    /// Git spawn failures and state-store errors.
    pub async fn status(&self) -> Result<LedgerStatus> {
        let state = self.state.load()?;
        let available = self.available().await?;
        let online = self.online().await?;
        let healthy = available && !self.is_stale().await?;
        Ok(LedgerStatus {
            branch: self.config.branch.clone(),
            available,
            online,
            healthy,
            last_pull_at: state.last_pull_at,
            last_push_at: state.last_push_at,
            ledger_head: state.ledger_head,
            offline_claims: state.offline_claims.len(),
        })
    }

    // ---- Pull / push ----------------------------------------------------

    /// Pull the ledger: fetch and hard-reset the worktree to the remote
    /// branch. No three-way merge — the remote ledger is authoritative;
    /// claim conflicts are resolved by the retry loop, not by merging.
    ///
    /// When a stale-claim threshold is configured, expired claims are
    /// released as part of the pull.
    ///
    /// # Errors
    ///
    /// Git/network failures.
    pub async fn pull(&self) -> Result<()> {
        self.ensure_ready().await?;

        let branch = &self.config.branch;
        let remote = &self.config.remote;
        let tracking = format!("refs/remotes/{remote}/{branch}");

        self.repo_git
            .fetch(remote, &format!("+refs/heads/{branch}:{tracking}"))
            .await?;
        self.worktree_git()
            .run(&["reset", "--hard", &tracking])
            .await?;

        let mut state = self.state.load()?;
        state.last_pull_at = Some(Utc::now());
        state.ledger_head = self.worktree_git().rev_parse("HEAD").await?;
        self.state.save(&state)?;

        if let Some(timeout) = self.config.claim_timeout {
            let threshold = Utc::now()
                - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::hours(1));
            let released = self.release_stale_claims(threshold).await?;
            if !released.is_empty() {
                tracing::info!(count = released.len(), "released stale claims during pull");
            }
        }
        Ok(())
    }

    /// Commit any pending `.eluent/` changes in the worktree and push.
    ///
    /// # Errors
    ///
    /// Git/network failures.
    pub async fn push(&self, message: &str) -> Result<bool> {
        let committed = self
            .worktree_git()
            .commit_paths(&[ELUENT_DIR], message)
            .await?;
        self.push_branch().await?;
        Ok(committed)
    }

    // ---- Claim protocol -------------------------------------------------

    /// Atomically claim an atom for an agent.
    ///
    /// The full protocol: recover the worktree if stale, pull, claim
    /// locally in the worktree, commit, push; on push failure back off
    /// (exponential with ±20 % jitter) and loop, up to the retry cap.
    ///
    /// # Errors
    ///
    /// Git/network failures outside the push (push failures feed the
    /// retry loop), IO failures, and [`CoreError::NotFound`] for unknown
    /// atoms. Claimability outcomes (conflict, rejected, retries
    /// exhausted) are values, not errors.
    pub async fn claim_and_push(&self, atom_id: &AtomId, agent_id: &str) -> Result<ClaimOutcome> {
        let max_retries = self.config.max_retries.clamp(1, 100);
        let mut retries: u32 = 0;

        loop {
            self.ensure_ready().await?;
            self.pull().await?;

            let (store, _) = RecordStore::open(&self.worktree).await?;
            let before = store.version().await;
            match store.claim_atom(atom_id, agent_id).await {
                Ok(_) => {}
                Err(CoreError::Conflict { owner }) => return Ok(ClaimOutcome::Conflict { owner }),
                Err(CoreError::InvalidState { current }) => {
                    return Ok(ClaimOutcome::Rejected {
                        reason: format!("atom is {current}"),
                    })
                }
                Err(CoreError::InvalidRequest(reason)) => {
                    return Ok(ClaimOutcome::Rejected { reason })
                }
                Err(e) => return Err(e.into()),
            }

            if store.version().await == before {
                // Already ours; nothing new to record in the ledger.
                return Ok(ClaimOutcome::Success { retries });
            }

            let committed = self
                .worktree_git()
                .commit_paths(
                    &[ELUENT_DIR],
                    &format!("eluent: claim {atom_id} by {agent_id}"),
                )
                .await?;
            if !committed {
                return Ok(ClaimOutcome::Success { retries });
            }

            if !self.config.auto_push {
                return Ok(ClaimOutcome::Success { retries });
            }

            match self.push_branch().await {
                Ok(()) => return Ok(ClaimOutcome::Success { retries }),
                Err(e @ (SyncError::GitFailed { .. } | SyncError::GitTimeout { .. })) => {
                    retries += 1;
                    if retries >= max_retries {
                        tracing::warn!(atom = %atom_id, attempts = retries, error = %e, "claim push retries exhausted");
                        return Ok(ClaimOutcome::MaxRetriesExceeded { attempts: retries });
                    }
                    let delay = backoff_delay(retries);
                    tracing::debug!(atom = %atom_id, attempt = retries, delay_ms = delay.as_millis() as u64, "claim push failed; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release a claim. Idempotent: releasing an atom that is not in
    /// progress succeeds without touching the ledger.
    ///
    /// # Errors
    ///
    /// Git/network and store failures.
    pub async fn release_claim(&self, atom_id: &AtomId) -> Result<()> {
        self.ensure_ready().await?;
        self.pull().await?;

        let (store, _) = RecordStore::open(&self.worktree).await?;
        let before = store.version().await;
        store.release_atom(atom_id).await?;
        if store.version().await == before {
            return Ok(());
        }

        self.worktree_git()
            .commit_paths(&[ELUENT_DIR], &format!("eluent: release {atom_id}"))
            .await?;
        if self.config.auto_push {
            self.push_branch().await?;
        }
        Ok(())
    }

    /// Touch `updated_at` on a claimed atom so stale-claim policies see
    /// liveness. Cooperative: any agent may heartbeat any claim.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidState`] when the atom is not in progress;
    /// git/network failures.
    pub async fn heartbeat(&self, atom_id: &AtomId) -> Result<()> {
        self.ensure_ready().await?;
        self.pull().await?;

        let (store, _) = RecordStore::open(&self.worktree).await?;
        store.heartbeat_atom(atom_id).await?;

        self.worktree_git()
            .commit_paths(&[ELUENT_DIR], &format!("eluent: heartbeat {atom_id}"))
            .await?;
        if self.config.auto_push {
            self.push_branch().await?;
        }
        Ok(())
    }

    /// Release every in-progress atom whose `updated_at` is older than
    /// the threshold. One batch commit names the released ids and their
    /// previous assignees (truncated past a handful). Returns the
    /// released `(id, previous_assignee)` pairs.
    ///
    /// # Errors
    ///
    /// Git/network and store failures.
    pub async fn release_stale_claims(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<(AtomId, Option<String>)>> {
        let (store, _) = RecordStore::open(&self.worktree).await?;
        let stale: Vec<(AtomId, Option<String>)> = store
            .list(&crate::domain::AtomFilter {
                status: Some(Status::InProgress),
                ..Default::default()
            })
            .await
            .into_iter()
            .filter(|atom| atom.updated_at < threshold)
            .map(|atom| (atom.id, atom.assignee))
            .collect();

        if stale.is_empty() {
            return Ok(stale);
        }

        for (atom_id, _) in &stale {
            store.release_atom(atom_id).await?;
        }

        let committed = self
            .worktree_git()
            .commit_paths(&[ELUENT_DIR], &stale_claims_message(&stale))
            .await?;
        if committed && self.config.auto_push {
            self.push_branch().await?;
        }
        Ok(stale)
    }

    // ---- Tree copies ----------------------------------------------------

    /// Copy the ledger's `.eluent/` over the main checkout's `.eluent/`.
    ///
    /// # Errors
    ///
    /// IO failures.
    pub fn sync_to_main(&self) -> Result<usize> {
        copy_eluent_tree(
            &self.worktree.join(ELUENT_DIR),
            &self.repo_root.join(ELUENT_DIR),
        )
    }

    /// Copy the main checkout's `.eluent/` into the ledger worktree.
    ///
    /// # Errors
    ///
    /// IO failures.
    pub fn seed_from_main(&self) -> Result<usize> {
        copy_eluent_tree(
            &self.repo_root.join(ELUENT_DIR),
            &self.worktree.join(ELUENT_DIR),
        )
    }

    // ---- Internals ------------------------------------------------------

    fn worktree_git(&self) -> Git {
        self.repo_git.in_dir(&self.worktree)
    }

    async fn push_branch(&self) -> Result<()> {
        let branch = &self.config.branch;
        self.worktree_git()
            .push(&self.config.remote, &format!("{branch}:{branch}"))
            .await?;

        let mut state = self.state.load()?;
        state.last_push_at = Some(Utc::now());
        state.ledger_head = self.worktree_git().rev_parse("HEAD").await?;
        self.state.save(&state)?;
        Ok(())
    }

    /// Recover the worktree if it has gone stale.
    async fn ensure_ready(&self) -> Result<()> {
        if self.is_stale().await? {
            tracing::warn!(worktree = %self.worktree.display(), "ledger worktree stale; recovering");
            self.recover().await?;
        }
        Ok(())
    }

    /// Tear the worktree down and recreate it from the branch.
    async fn recover(&self) -> Result<()> {
        let _ = self.repo_git.worktree_remove(&self.worktree).await;
        let _ = self.repo_git.worktree_prune().await;
        if self.worktree.exists() {
            std::fs::remove_dir_all(&self.worktree)?;
        }
        self.ensure_worktree().await?;

        let mut state = self.state.load()?;
        state.valid = true;
        self.state.save(&state)?;
        Ok(())
    }

    /// Make sure the ledger branch exists locally, creating it as an
    /// orphan (or fetching it from the remote) when absent.
    async fn ensure_branch(&self) -> Result<()> {
        let branch = &self.config.branch;
        let branch_ref = format!("refs/heads/{branch}");
        if self.repo_git.rev_parse(&branch_ref).await?.is_some() {
            return Ok(());
        }

        // Prefer the remote's copy when one exists.
        if self
            .repo_git
            .ls_remote_branch(&self.config.remote, branch)
            .await?
            .is_some()
        {
            self.repo_git
                .fetch(&self.config.remote, &format!("+refs/heads/{branch}:{branch_ref}"))
                .await?;
            return Ok(());
        }

        self.create_orphan_branch().await
    }

    /// Create the orphan branch through the worktree: detach a worktree,
    /// `checkout --orphan`, clear the inherited tree, seed `.eluent/`
    /// from main, commit, and push (best effort — creation must work
    /// offline).
    async fn create_orphan_branch(&self) -> Result<()> {
        let branch = &self.config.branch;
        self.clear_worktree_dir().await?;
        self.repo_git
            .run(&[
                "worktree",
                "add",
                "--detach",
                &self.worktree.to_string_lossy(),
            ])
            .await
            .map_err(|e| SyncError::Worktree(format!("creating detached worktree: {e}")))?;

        let wt = self.worktree_git();
        wt.run(&["checkout", "--orphan", branch]).await?;
        // The orphan checkout inherits the old tree; clear it.
        let _ = wt.run_ok(&["rm", "-rfq", "."]).await?;

        self.seed_from_main()?;
        wt.run(&["add", ELUENT_DIR]).await?;
        wt.run(&["commit", "-m", "eluent: initialize ledger"]).await?;

        if self.repo_git.has_remote().await? {
            if let Err(e) = self.push_branch().await {
                tracing::warn!(error = %e, "could not push new ledger branch; will push on first claim");
            }
        }
        Ok(())
    }

    /// Make sure the worktree directory exists and is registered on the
    /// ledger branch.
    async fn ensure_worktree(&self) -> Result<()> {
        if self.worktree_registered().await? {
            if self.is_stale().await? {
                // Registered, but on the wrong branch or broken.
                return Box::pin(self.recover()).await;
            }
            return Ok(());
        }

        self.clear_worktree_dir().await?;
        self.repo_git
            .run(&[
                "worktree",
                "add",
                &self.worktree.to_string_lossy(),
                &self.config.branch,
            ])
            .await
            .map_err(|e| SyncError::Worktree(format!("attaching worktree: {e}")))?;
        Ok(())
    }

    /// Remove an unregistered leftover worktree directory so
    /// `git worktree add` does not refuse the path.
    async fn clear_worktree_dir(&self) -> Result<()> {
        if self.worktree.exists() {
            let _ = self.repo_git.worktree_prune().await;
            std::fs::remove_dir_all(&self.worktree)?;
        }
        Ok(())
    }

    async fn worktree_registered(&self) -> Result<bool> {
        let canonical = self.worktree.canonicalize().unwrap_or_else(|_| self.worktree.clone());
        Ok(self
            .repo_git
            .worktree_list()
            .await?
            .iter()
            .any(|(path, _)| path == &self.worktree || path == &canonical))
    }
}

/// Exponential backoff with ±20 % jitter: `min(BASE·2^(n−1), MAX)` ms.
fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = BACKOFF_BASE_MS
        .saturating_mul(1_u64 << exponent)
        .min(BACKOFF_MAX_MS);
    let jitter = rand::rng().random_range(-0.2..=0.2_f64);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis(((base as f64) * (1.0 + jitter)).max(0.0) as u64)
}

/// Batch commit message for stale-claim release; full listing up to a
/// handful, then a count.
fn stale_claims_message(released: &[(AtomId, Option<String>)]) -> String {
    let shown: Vec<String> = released
        .iter()
        .take(STALE_MESSAGE_LIMIT)
        .map(|(atom_id, assignee)| match assignee {
            Some(agent) => format!("{atom_id} (was {agent})"),
            None => atom_id.to_string(),
        })
        .collect();

    let mut message = format!(
        "eluent: release {} stale claim{}: {}",
        released.len(),
        if released.len() == 1 { "" } else { "s" },
        shown.join(", ")
    );
    if released.len() > STALE_MESSAGE_LIMIT {
        message.push_str(&format!(" and {} more", released.len() - STALE_MESSAGE_LIMIT));
    }
    message
}

/// Copy one `.eluent/` tree over another, file by file.
///
/// Symlinks are skipped (never followed out of the tree), as are
/// local-only artifacts: the ephemeral file, locks, temp and backup
/// files, and orchestrator sync state. Returns the number of files
/// copied.
fn copy_eluent_tree(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }
    std::fs::create_dir_all(dst)?;

    let mut copied = 0usize;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from_dir, to_dir)) = stack.pop() {
        for entry in std::fs::read_dir(&from_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if should_skip_entry(&name_str) {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                tracing::debug!(path = %entry.path().display(), "skipping symlink in tree copy");
                continue;
            }

            let target = to_dir.join(&name);
            if file_type.is_dir() {
                std::fs::create_dir_all(&target)?;
                stack.push((entry.path(), target));
            } else {
                std::fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

fn should_skip_entry(name: &str) -> bool {
    name == EPHEMERAL_FILE
        || name == super::orchestrator::SYNC_STATE_FILE
        || name == super::orchestrator::SYNC_LOCK_FILE
        || name.ends_with(".lock")
        || name.ends_with(".tmp")
        || name.ends_with(".bak")
}

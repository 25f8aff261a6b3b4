//! Per-repository instance cache.
//!
//! The daemon serves many repositories; each gets one [`RepoHandle`]
//! (store + config + optional ledger syncer) cached by canonical path.
//! Handle construction opens files and may run git, so it happens
//! *outside* the cache mutex; insertion goes through a non-locking helper
//! on the already-held guard, so re-entrant paths cannot deadlock and a
//! lost construction race just drops its duplicate.

use crate::error::{DaemonError, Result};
use eluent::config::{EluentConfig, UserContext};
use eluent::store::RecordStore;
use eluent::sync::{LedgerConfig, LedgerSyncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything the daemon holds for one repository.
#[derive(Debug)]
pub struct RepoHandle {
    /// Canonical repository root.
    pub repo_root: PathBuf,
    /// The open record store.
    pub store: RecordStore,
    /// Parsed repository configuration.
    pub config: EluentConfig,
    /// The ledger syncer, when `sync.ledger_branch` is configured.
    pub ledger: Option<LedgerSyncer>,
}

impl RepoHandle {
    async fn build(user: &UserContext, repo_root: &Path) -> Result<Self> {
        let (store, warnings) = RecordStore::open(repo_root).await?;
        for warning in &warnings {
            tracing::warn!(repo = %repo_root.display(), ?warning, "store load warning");
        }

        let config = EluentConfig::load(repo_root)?;

        // The repo config may relocate this repo's per-user state.
        let user = match &config.sync.global_path_override {
            Some(path) => UserContext::new(Some(path)),
            None => user.clone(),
        };

        let ledger = match LedgerConfig::from_config(&config) {
            Some(ledger_config) => Some(LedgerSyncer::new(
                repo_root.to_path_buf(),
                ledger_config,
                &user,
            )?),
            None => None,
        };

        if config.ephemeral.cleanup_days > 0 {
            let cutoff =
                chrono::Utc::now() - chrono::Duration::days(i64::from(config.ephemeral.cleanup_days));
            let removed = store.cleanup_ephemeral(cutoff).await?;
            if !removed.is_empty() {
                tracing::info!(
                    repo = %repo_root.display(),
                    count = removed.len(),
                    "expired ephemeral atoms removed"
                );
            }
        }

        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            store,
            config,
            ledger,
        })
    }

    /// The ledger syncer, or [`DaemonError::Sync`] with
    /// `LedgerNotConfigured` when the repo has none.
    pub fn ledger(&self) -> Result<&LedgerSyncer> {
        self.ledger
            .as_ref()
            .ok_or(DaemonError::Sync(eluent::sync::SyncError::LedgerNotConfigured))
    }
}

/// The daemon-wide cache of repository handles.
pub struct DaemonContext {
    user: UserContext,
    repos: Mutex<HashMap<PathBuf, Arc<RepoHandle>>>,
}

impl DaemonContext {
    /// An empty cache for the given user context.
    #[must_use]
    pub fn new(user: UserContext) -> Self {
        Self {
            user,
            repos: Mutex::new(HashMap::new()),
        }
    }

    /// The user context this daemon runs under.
    #[must_use]
    pub fn user(&self) -> &UserContext {
        &self.user
    }

    /// Fetch or build the handle for a repository path.
    ///
    /// # Errors
    ///
    /// [`DaemonError::InvalidRequest`] for paths that do not resolve,
    /// plus store/config/ledger construction failures.
    pub async fn repo(&self, repo_path: &str) -> Result<Arc<RepoHandle>> {
        let key = std::fs::canonicalize(repo_path)
            .map_err(|e| DaemonError::InvalidRequest(format!("bad repo_path {repo_path}: {e}")))?;

        if let Some(handle) = self.repos.lock().await.get(&key) {
            return Ok(handle.clone());
        }

        // Build outside the critical section: opening the store and
        // constructing the syncer touch the filesystem and git.
        let handle = Arc::new(RepoHandle::build(&self.user, &key).await?);

        let mut repos = self.repos.lock().await;
        Ok(Self::insert_cached(&mut repos, key, handle))
    }

    /// Drop a cached handle so the next request rebuilds it (used after
    /// `force_resync`).
    pub async fn evict(&self, repo_path: &str) {
        if let Ok(key) = std::fs::canonicalize(repo_path) {
            self.repos.lock().await.remove(&key);
        }
    }

    /// Non-locking insert on an already-held guard. If another task won
    /// the construction race, its handle stays and ours is dropped.
    fn insert_cached(
        repos: &mut HashMap<PathBuf, Arc<RepoHandle>>,
        key: PathBuf,
        handle: Arc<RepoHandle>,
    ) -> Arc<RepoHandle> {
        repos.entry(key).or_insert(handle).clone()
    }
}

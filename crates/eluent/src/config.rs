//! Repository configuration (`.eluent/config.yaml`) and per-user context.
//!
//! Configuration is loaded with serde defaults, so an absent file and an
//! empty file both mean "all defaults". Unknown keys are ignored; values
//! outside their documented ranges are clamped with a warning rather than
//! rejected, since a bad config line should not strand a repository.

use crate::domain::IssueType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside `.eluent/`.
pub const CONFIG_FILE: &str = "config.yaml";

/// Bounds for `sync.network_timeout` (seconds).
pub const NETWORK_TIMEOUT_RANGE: (u64, u64) = (5, 300);

/// Bounds for `sync.claim_retries`.
pub const CLAIM_RETRIES_RANGE: (u32, u32) = (1, 100);

/// Repository configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EluentConfig {
    /// Defaults applied when creating atoms.
    pub defaults: DefaultsConfig,
    /// Sync and ledger settings.
    pub sync: SyncConfig,
    /// Ephemeral-item housekeeping.
    pub ephemeral: EphemeralConfig,
}

/// `defaults.*` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Priority used when creating atoms.
    pub priority: u8,
    /// Issue type used when creating atoms.
    pub issue_type: IssueType,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            priority: 2,
            issue_type: IssueType::Task,
        }
    }
}

/// `sync.*` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// If set, enables ledger coordination on this branch.
    pub ledger_branch: Option<String>,
    /// Push after each claim.
    pub auto_claim_push: bool,
    /// Max retries in the claim loop (clamped 1..=100).
    pub claim_retries: u32,
    /// Stale-claim auto-release threshold in hours, if set.
    pub claim_timeout_hours: Option<f64>,
    /// Behavior when the ledger is configured but unavailable.
    pub offline_mode: OfflineMode,
    /// Timeout for git network operations in seconds (clamped 5..=300).
    pub network_timeout: u64,
    /// Override for the per-user data root.
    pub global_path_override: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ledger_branch: None,
            auto_claim_push: true,
            claim_retries: 5,
            claim_timeout_hours: None,
            offline_mode: OfflineMode::Local,
            network_timeout: 30,
            global_path_override: None,
        }
    }
}

/// What a claim does when the ledger is configured but unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflineMode {
    /// Claim locally and queue the claim for reconciliation.
    #[default]
    Local,
    /// Refuse the claim with an error.
    Fail,
}

/// `ephemeral.*` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EphemeralConfig {
    /// Retention for ephemeral items, in days.
    pub cleanup_days: u32,
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self { cleanup_days: 7 }
    }
}

impl EluentConfig {
    /// Load from `<repo>/.eluent/config.yaml`, applying defaults when the
    /// file is absent and clamping out-of-range values.
    ///
    /// # Errors
    ///
    /// IO errors, or [`Error::Config`] when the file exists but is not
    /// valid YAML.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join(crate::store::ELUENT_DIR).join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                Self::default()
            } else {
                serde_yaml::from_str(&text).map_err(Error::Config)?
            }
        } else {
            Self::default()
        };
        config.normalize();
        Ok(config)
    }

    /// Write the config back to `<repo>/.eluent/config.yaml`.
    ///
    /// # Errors
    ///
    /// IO errors, or [`Error::Config`] on serialization failure.
    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let path = repo_root.join(crate::store::ELUENT_DIR).join(CONFIG_FILE);
        let text = serde_yaml::to_string(self).map_err(Error::Config)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Clamp values into their documented ranges, warning on adjustment.
    fn normalize(&mut self) {
        let (lo, hi) = NETWORK_TIMEOUT_RANGE;
        if self.sync.network_timeout < lo || self.sync.network_timeout > hi {
            let clamped = self.sync.network_timeout.clamp(lo, hi);
            tracing::warn!(
                configured = self.sync.network_timeout,
                clamped,
                "sync.network_timeout outside {lo}..={hi}; clamping"
            );
            self.sync.network_timeout = clamped;
        }

        let (lo, hi) = CLAIM_RETRIES_RANGE;
        if self.sync.claim_retries < lo || self.sync.claim_retries > hi {
            let clamped = self.sync.claim_retries.clamp(lo, hi);
            tracing::warn!(
                configured = self.sync.claim_retries,
                clamped,
                "sync.claim_retries outside {lo}..={hi}; clamping"
            );
            self.sync.claim_retries = clamped;
        }

        if let Some(hours) = self.sync.claim_timeout_hours {
            if hours < 1.0 {
                tracing::warn!(
                    hours,
                    "sync.claim_timeout_hours below 1 releases claims aggressively"
                );
            }
        }
    }

    /// The network timeout as a [`Duration`].
    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.network_timeout)
    }

    /// The stale-claim threshold as a [`Duration`], if configured.
    #[must_use]
    pub fn claim_timeout(&self) -> Option<Duration> {
        self.sync
            .claim_timeout_hours
            .map(|hours| Duration::from_secs_f64(hours * 3600.0))
    }
}

/// Per-user global state locations, threaded explicitly through
/// constructors rather than read from ambient globals.
#[derive(Debug, Clone)]
pub struct UserContext {
    data_root: PathBuf,
}

impl UserContext {
    /// Build from an optional override (the `sync.global_path_override`
    /// key), falling back to `$XDG_DATA_HOME/eluent`.
    #[must_use]
    pub fn new(override_root: Option<&Path>) -> Self {
        let data_root = override_root.map_or_else(
            || {
                dirs::data_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("eluent")
            },
            Path::to_path_buf,
        );
        Self { data_root }
    }

    /// The per-user data root.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// The per-repository directory under the data root.
    ///
    /// Named `<dirname>-<8 hash chars>` so distinct checkouts with the
    /// same directory name do not collide.
    #[must_use]
    pub fn repo_dir(&self, repo_root: &Path) -> PathBuf {
        let name = repo_root
            .file_name()
            .map_or_else(|| "repo".to_string(), |n| n.to_string_lossy().into_owned());
        let mut hasher = Sha256::new();
        hasher.update(repo_root.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.data_root.join(format!("{name}-{}", &digest[..8]))
    }

    /// Path of the ledger worktree for a repository.
    #[must_use]
    pub fn worktree_path(&self, repo_root: &Path) -> PathBuf {
        self.repo_dir(repo_root).join(".sync-worktree")
    }

    /// Path of the ledger state file for a repository.
    #[must_use]
    pub fn ledger_state_path(&self, repo_root: &Path) -> PathBuf {
        self.repo_dir(repo_root).join(".ledger-sync-state")
    }

    /// Path of the ledger lock file for a repository.
    #[must_use]
    pub fn ledger_lock_path(&self, repo_root: &Path) -> PathBuf {
        self.repo_dir(repo_root).join(".ledger.lock")
    }

    /// The daemon's Unix socket path.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.data_root.join("daemon.sock")
    }

    /// The daemon's PID file path.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.data_root.join("daemon.pid")
    }
}

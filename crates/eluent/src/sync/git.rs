//! Git subprocess plumbing.
//!
//! Every git interaction shells out to `git -C <dir> …` with captured
//! stdout/stderr. Network-touching commands (`fetch`, `push`, `ls-remote`)
//! run under a per-invocation timeout and surface [`SyncError::GitTimeout`]
//! so retry loops can distinguish a slow remote from a refused push.

use super::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs git commands against one repository (or worktree) directory.
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
    network_timeout: Duration,
}

impl Git {
    /// A runner for the given directory with the default 30 s network
    /// timeout.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            network_timeout: Duration::from_secs(30),
        }
    }

    /// Override the network timeout (config range 5–300 s).
    #[must_use]
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// The directory this runner targets.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A runner for a different directory sharing this one's settings.
    #[must_use]
    pub fn in_dir(&self, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            network_timeout: self.network_timeout,
        }
    }

    /// Run a git command, returning trimmed stdout.
    ///
    /// # Errors
    ///
    /// [`SyncError::GitFailed`] on non-zero exit, [`SyncError::Io`] if git
    /// itself cannot be spawned.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        self.exec(args, None).await
    }

    /// Run a network-touching git command under the configured timeout.
    ///
    /// # Errors
    ///
    /// [`SyncError::GitTimeout`] when the timeout elapses; otherwise as
    /// [`Git::run`].
    pub async fn run_network(&self, args: &[&str]) -> Result<String> {
        self.exec(args, Some(self.network_timeout)).await
    }

    /// Run a git command where non-zero exit is an expected outcome
    /// (e.g. `rev-parse` on a ref that may not exist). Returns `None`
    /// instead of an error in that case.
    ///
    /// # Errors
    ///
    /// [`SyncError::Io`] if git cannot be spawned.
    pub async fn run_ok(&self, args: &[&str]) -> Result<Option<String>> {
        match self.exec(args, None).await {
            Ok(out) => Ok(Some(out)),
            Err(SyncError::GitFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn exec(&self, args: &[&str], timeout: Option<Duration>) -> Result<String> {
        let command_line = format!("git -C {} {}", self.dir.display(), args.join(" "));
        tracing::debug!(command = %command_line, "running git");

        let mut command = Command::new("git");
        command
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(SyncError::GitTimeout {
                        command: command_line,
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => command.output().await?,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(SyncError::GitFailed {
                command: command_line,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit: output.status.code(),
            })
        }
    }

    // ---- Focused helpers ------------------------------------------------

    /// Resolve a rev to a full SHA, or `None` if it does not resolve.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub async fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        Ok(self
            .run_ok(&["rev-parse", "--verify", "--quiet", rev])
            .await?
            .filter(|sha| !sha.is_empty()))
    }

    /// Read a file's contents at a commit, or `None` if the path does not
    /// exist there.
    ///
    /// # Errors
    ///
    /// Spawn failures only; a missing path reads as `None`.
    pub async fn show_file(&self, commit: &str, path: &str) -> Result<Option<String>> {
        self.run_ok(&["show", &format!("{commit}:{path}")]).await
    }

    /// Whether the repository has any remote configured.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub async fn has_remote(&self) -> Result<bool> {
        Ok(self
            .run_ok(&["remote"])
            .await?
            .is_some_and(|out| !out.is_empty()))
    }

    /// Fetch one ref from a remote, under the network timeout.
    ///
    /// # Errors
    ///
    /// Network/timeout/exit failures per [`Git::run_network`].
    pub async fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run_network(&["fetch", remote, refspec]).await?;
        Ok(())
    }

    /// Push one refspec to a remote, under the network timeout.
    ///
    /// # Errors
    ///
    /// Network/timeout/exit failures per [`Git::run_network`].
    pub async fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run_network(&["push", remote, refspec]).await?;
        Ok(())
    }

    /// The SHA a remote advertises for a branch, or `None` if the remote
    /// does not have it (or cannot be reached).
    ///
    /// # Errors
    ///
    /// [`SyncError::GitTimeout`] on timeout; spawn failures.
    pub async fn ls_remote_branch(&self, remote: &str, branch: &str) -> Result<Option<String>> {
        let out = match self
            .run_network(&["ls-remote", remote, &format!("refs/heads/{branch}")])
            .await
        {
            Ok(out) => out,
            Err(SyncError::GitFailed { stderr, .. }) => {
                tracing::debug!(%stderr, "ls-remote failed; treating remote branch as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(out
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .map(ToString::to_string))
    }

    /// `git status --porcelain` output; empty string means clean.
    ///
    /// # Errors
    ///
    /// Exit/spawn failures.
    pub async fn status_porcelain(&self) -> Result<String> {
        self.run(&["status", "--porcelain"]).await
    }

    /// The merge base of two revs, or `None` when histories are unrelated.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.run_ok(&["merge-base", a, b]).await
    }

    /// Stage paths and commit with the given message. Returns `false`
    /// without committing when the staged diff is empty.
    ///
    /// # Errors
    ///
    /// Exit/spawn failures.
    pub async fn commit_paths(&self, paths: &[&str], message: &str) -> Result<bool> {
        let mut add_args = vec!["add", "--"];
        add_args.extend_from_slice(paths);
        self.run(&add_args).await?;

        // diff --cached --quiet exits 0 when nothing is staged.
        let nothing_staged = self.run_ok(&["diff", "--cached", "--quiet"]).await?.is_some();
        if nothing_staged {
            return Ok(false);
        }

        self.run(&["commit", "-m", message]).await?;
        Ok(true)
    }

    /// Registered worktrees, as (path, branch-ref) pairs.
    ///
    /// # Errors
    ///
    /// Exit/spawn failures.
    pub async fn worktree_list(&self) -> Result<Vec<(PathBuf, Option<String>)>> {
        let out = self.run(&["worktree", "list", "--porcelain"]).await?;
        let mut entries = Vec::new();
        let mut current_path: Option<PathBuf> = None;
        let mut current_branch: Option<String> = None;

        for line in out.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(done) = current_path.take() {
                    entries.push((done, current_branch.take()));
                }
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch) = line.strip_prefix("branch ") {
                current_branch = Some(branch.to_string());
            }
        }
        if let Some(done) = current_path {
            entries.push((done, current_branch));
        }
        Ok(entries)
    }

    /// Remove a worktree registration and its directory.
    ///
    /// # Errors
    ///
    /// Exit/spawn failures.
    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        self.run(&["worktree", "remove", "--force", &path.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Prune stale worktree registrations.
    ///
    /// # Errors
    ///
    /// Exit/spawn failures.
    pub async fn worktree_prune(&self) -> Result<()> {
        self.run(&["worktree", "prune"]).await?;
        Ok(())
    }
}

/// Validate a branch name against the `git check-ref-format` rules eluent
/// relies on. Checked on every ledger use, since the name comes from user
/// configuration.
///
/// # Errors
///
/// [`SyncError::BranchInvalid`] naming the offending input.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with('.')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.contains("//")
        || name.contains("@{")
        || name.contains('\\')
        || name
            .chars()
            .any(|c| c.is_ascii_control() || " ~^:?*[".contains(c));

    if invalid {
        return Err(SyncError::BranchInvalid(name.to_string()));
    }
    Ok(())
}

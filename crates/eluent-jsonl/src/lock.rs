//! Scoped advisory file locks with a bounded wait.
//!
//! All multi-process coordination in eluent goes through advisory locks on
//! small sentinel files (the data file itself, `.sync.lock`, `.ledger.lock`).
//! The guard returned here releases on every exit path, including panics,
//! because the lock is dropped with the file handle.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long to sleep between lock attempts while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// A held advisory lock on a file.
///
/// The lock is released when the guard is dropped. Locks are advisory:
/// they coordinate cooperating eluent processes, not arbitrary writers.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock, waiting up to `wait` for contention to clear.
    ///
    /// The file is created if it does not exist. Contention is polled at a
    /// 10 ms interval; if the lock is still held after `wait` has elapsed,
    /// [`Error::LockContention`] is returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be opened and
    /// `Error::LockContention` if the bounded wait expires.
    pub fn acquire_exclusive(path: &Path, wait: Duration) -> Result<Self> {
        Self::acquire(path, wait, LockMode::Exclusive)
    }

    /// Acquire a shared lock, waiting up to `wait`.
    ///
    /// Readers take shared locks so a rewrite cannot start mid-read, while
    /// still allowing concurrent readers.
    ///
    /// # Errors
    ///
    /// Same conditions as [`FileLock::acquire_exclusive`].
    pub fn acquire_shared(path: &Path, wait: Duration) -> Result<Self> {
        Self::acquire(path, wait, LockMode::Shared)
    }

    /// Try to acquire an exclusive lock without waiting.
    ///
    /// Used by the sync orchestrator, which must fail fast when another
    /// sync is already in flight rather than queue behind it.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockContention` immediately if the lock is held.
    pub fn try_exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(_) => Err(Error::LockContention {
                path: path.to_path_buf(),
                waited_ms: 0,
            }),
        }
    }

    fn acquire(path: &Path, wait: Duration, mode: LockMode) -> Result<Self> {
        let file = open_lock_file(path)?;
        let start = Instant::now();

        loop {
            let attempt = match mode {
                LockMode::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
                LockMode::Shared => fs2::FileExt::try_lock_shared(&file),
            };

            if attempt.is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= wait {
                return Err(Error::LockContention {
                    path: path.to_path_buf(),
                    waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                });
            }

            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// The path of the locked file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A reference to the locked file handle.
    ///
    /// Writers that lock the data file itself (locked appends) write
    /// through this handle so lock and data stay on the same descriptor.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// A mutable reference to the locked file handle.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Unlock errors at drop time are unreportable; the OS releases the
        // lock when the descriptor closes anyway.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[derive(Clone, Copy)]
enum LockMode {
    Exclusive,
    Shared,
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(Error::Io)
}

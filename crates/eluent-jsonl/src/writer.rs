//! JSONL writing: buffered async writer and locked appends.

use crate::error::Result;
use crate::lock::FileLock;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Async buffered writer for JSONL data.
///
/// Each value is serialized to one line followed by `\n`. Call
/// [`JsonlWriter::flush`] before dropping; buffered bytes are otherwise lost.
pub struct JsonlWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> JsonlWriter<W> {
    /// Wrap an async writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Serialize one value as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails, `Error::Io` on write
    /// failure.
    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Serialize every value from an iterator, one line each.
    ///
    /// # Errors
    ///
    /// Stops at the first serialization or IO failure; earlier lines may
    /// already be buffered.
    pub async fn write_all<T, I>(&mut self, values: I) -> Result<()>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        for value in values {
            self.write(&value).await?;
        }
        Ok(())
    }

    /// Flush buffered data to the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` on flush failure.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Consume the writer, returning the underlying async writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Append records to a JSONL file under an exclusive advisory lock.
///
/// The sequence is: lock, seek-to-end (append mode), write all lines, fsync,
/// unlock (on drop). The fsync-before-unlock ordering is what makes a
/// subsequent locked reader see complete records.
///
/// New records always go through this path; modifications go through
/// [`rewrite_atomic`] instead.
///
/// [`rewrite_atomic`]: crate::atomic::rewrite_atomic
///
/// # Errors
///
/// Returns `Error::LockContention` if the lock stays held past `lock_wait`,
/// `Error::Json` on serialization failure, `Error::Io` otherwise. On error
/// after a partial write the file may carry a trailing partial line; the
/// resilient reader treats that line as a warning.
pub fn append_locked<T: Serialize>(
    path: impl AsRef<Path>,
    records: &[T],
    lock_wait: Duration,
) -> Result<()> {
    let path = path.as_ref();
    let mut lock = FileLock::acquire_exclusive(path, lock_wait)?;

    // The lock handle doubles as the write handle; append by seeking the
    // cursor to the current end while holding the exclusive lock.
    let file = lock.file_mut();
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }

    use std::io::Seek;
    file.seek(std::io::SeekFrom::End(0))?;
    file.write_all(&buf)?;
    file.sync_all()?;

    Ok(())
}

//! Atomic full-file rewrites.
//!
//! Every update, delete, or merge rewrites the data file through this path:
//! write everything to a sibling temp file, fsync, then rename over the
//! target. POSIX renames within one filesystem are atomic, so readers see
//! either the old complete file or the new complete file, never a mix. A
//! crash mid-write leaves the original untouched; the temp file is removed
//! on failure and only consumed (by the rename) on success.

use crate::error::Result;
use crate::writer::JsonlWriter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// Atomically replace `path` with the serialized records.
///
/// # Errors
///
/// Returns `Error::Json` on serialization failure, `Error::Io` on write or
/// rename failure. On any failure the target file is unchanged and the temp
/// file has been removed (best effort).
pub async fn rewrite_atomic<T, I>(path: impl AsRef<Path>, records: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let path = path.as_ref();
    let temp_path = temp_sibling(path);

    if let Err(e) = write_and_sync(&temp_path, records).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Temp path next to the target so the rename stays on one filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut temp = path.to_path_buf();
    let new_extension = match path.extension() {
        Some(ext) => {
            let mut with_tmp = ext.to_os_string();
            with_tmp.push(".tmp");
            with_tmp
        }
        None => std::ffi::OsString::from("tmp"),
    };
    temp.set_extension(new_extension);
    temp
}

async fn write_and_sync<T, I>(temp_path: &Path, records: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(temp_path).await?;
    let mut writer = JsonlWriter::new(file);
    writer.write_all(records).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(())
}

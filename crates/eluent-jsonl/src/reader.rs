//! Resilient JSONL reading.
//!
//! A data file that travels through git merges and agent hand-offs will
//! eventually contain lines this process did not write. The reader's
//! contract is therefore: parse every line that deserializes, and report
//! every line that does not as a [`LineWarning`] instead of failing the
//! load. Corruption costs the affected record, never the database.

use crate::error::Result;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// A non-fatal problem found on one line during a resilient read.
///
/// Callers are expected to surface these (the record store logs them and
/// keeps a count); they indicate data that needs manual attention but did
/// not stop the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineWarning {
    /// The line was not valid JSON, or was valid JSON of the wrong shape.
    Malformed {
        /// 1-based line number in the file.
        line_number: usize,
        /// Parser description of the failure.
        error: String,
    },
}

impl LineWarning {
    /// The 1-based line number this warning refers to.
    #[must_use]
    pub fn line_number(&self) -> usize {
        match self {
            Self::Malformed { line_number, .. } => *line_number,
        }
    }
}

impl std::fmt::Display for LineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { line_number, error } => {
                write!(f, "line {line_number}: skipped malformed record: {error}")
            }
        }
    }
}

/// Read a JSONL file, skipping lines that fail to parse.
///
/// Returns the successfully parsed records in file order together with a
/// warning per skipped line. Blank lines (and trailing newlines) are
/// ignored silently; they are a normal artifact of appends.
///
/// A missing file is **not** an error here — it reads as empty. The caller
/// decides whether absence means "not initialized" (the data file) or
/// "nothing local yet" (the ephemeral file).
///
/// # Errors
///
/// Returns `Error::Io` only for real IO failures (permissions, disk);
/// per-line parse failures are downgraded to warnings.
pub async fn read_resilient<T>(path: impl AsRef<Path>) -> Result<(Vec<T>, Vec<LineWarning>)>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), Vec::new()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = line_number, error = %e, "skipping malformed JSONL line");
                warnings.push(LineWarning::Malformed {
                    line_number,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok((records, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Rec {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn reads_well_formed_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        tokio::fs::write(
            &path,
            "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":\"b\"}\n",
        )
        .await
        .unwrap();

        let (records, warnings) = read_resilient::<Rec>(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[1].name, "b");
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_with_warning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        tokio::fs::write(
            &path,
            "{\"id\":1,\"name\":\"a\"}\nnot json at all\n{\"id\":3,\"name\":\"c\"}\n",
        )
        .await
        .unwrap();

        let (records, warnings) = read_resilient::<Rec>(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line_number(), 2);
    }

    #[tokio::test]
    async fn wrong_shape_is_a_warning_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        tokio::fs::write(&path, "{\"unexpected\":true}\n").await.unwrap();

        let (records, warnings) = read_resilient::<Rec>(&path).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn blank_lines_are_ignored_silently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        tokio::fs::write(&path, "\n{\"id\":1,\"name\":\"a\"}\n\n\n")
            .await
            .unwrap();

        let (records, warnings) = read_resilient::<Rec>(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let (records, warnings) = read_resilient::<Rec>(dir.path().join("absent.jsonl"))
            .await
            .unwrap();
        assert!(records.is_empty());
        assert!(warnings.is_empty());
    }
}

//! The daemon wire protocol.
//!
//! Each message is a 4-byte big-endian unsigned length prefix followed by
//! that many bytes of UTF-8 JSON. Frames over 10 MiB are rejected from the
//! length prefix alone, before any body bytes are read or parsed.
//!
//! A request is `{id, cmd, args}`; a response is
//! `{id, status: "ok"|"error", data?, error?}`.

use crate::error::{DaemonError, ErrorBody, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size: 10 MiB.
pub const MAX_FRAME_BYTES: u32 = 10 * 1024 * 1024;

/// One request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation id, echoed in the response.
    pub id: u64,
    /// Command name.
    pub cmd: String,
    /// Command arguments; repo-scoped commands carry `repo_path` here.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The request's correlation id.
    pub id: u64,
    /// `"ok"` or `"error"`.
    pub status: String,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Payload on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// A success response.
    #[must_use]
    pub fn ok(id: u64, data: serde_json::Value) -> Self {
        Self {
            id,
            status: "ok".to_string(),
            data: Some(data),
            error: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn error(id: u64, error: &DaemonError) -> Self {
        Self {
            id,
            status: "error".to_string(),
            data: None,
            error: Some(ErrorBody::from_error(error)),
        }
    }
}

/// Read one length-prefixed frame. `Ok(None)` means the peer closed the
/// connection cleanly before a length prefix arrived.
///
/// # Errors
///
/// [`DaemonError::MessageTooLarge`] when the prefix exceeds the limit
/// (no body bytes are consumed); IO errors otherwise.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let declared = u32::from_be_bytes(prefix);
    if declared > MAX_FRAME_BYTES {
        return Err(DaemonError::MessageTooLarge {
            declared,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; declared as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one length-prefixed frame.
///
/// # Errors
///
/// [`DaemonError::MessageTooLarge`] for oversized bodies; IO errors.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| DaemonError::MessageTooLarge {
        declared: u32::MAX,
        max: MAX_FRAME_BYTES,
    })?;
    if len > MAX_FRAME_BYTES {
        return Err(DaemonError::MessageTooLarge {
            declared: len,
            max: MAX_FRAME_BYTES,
        });
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize and send one message.
///
/// # Errors
///
/// Serialization and frame-write failures.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    write_frame(writer, &body).await
}

/// Receive and parse one message; `Ok(None)` on clean EOF.
///
/// # Errors
///
/// Frame and parse failures ([`DaemonError::Protocol`] for a body that is
/// not the expected shape).
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let Some(body) = read_frame(reader).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| DaemonError::Protocol(format!("malformed frame body: {e}")))
}

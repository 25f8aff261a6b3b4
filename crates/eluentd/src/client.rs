//! Typed client for the daemon socket.
//!
//! External tooling (editors, agent harnesses) talks to the daemon
//! through this instead of hand-rolling frames.

use crate::error::{DaemonError, Result};
use crate::protocol::{read_message, write_message, Request, Response};
use std::path::Path;
use tokio::net::UnixStream;

/// A connected daemon client.
pub struct DaemonClient {
    stream: UnixStream,
    next_id: u64,
}

impl DaemonClient {
    /// Connect to the daemon socket.
    ///
    /// # Errors
    ///
    /// IO errors when the socket is absent or refuses the connection.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self { stream, next_id: 1 })
    }

    /// Send one command and wait for its response.
    ///
    /// # Errors
    ///
    /// Frame/IO failures, or [`DaemonError::Protocol`] when the response
    /// id does not match the request.
    pub async fn request(
        &mut self,
        cmd: &str,
        args: serde_json::Value,
    ) -> Result<Response> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request {
            id,
            cmd: cmd.to_string(),
            args,
        };
        write_message(&mut self.stream, &request).await?;

        let response: Response = read_message(&mut self.stream)
            .await?
            .ok_or_else(|| DaemonError::Protocol("connection closed mid-request".to_string()))?;
        if response.id != id {
            return Err(DaemonError::Protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        Ok(response)
    }

    /// Round-trip a `ping`.
    ///
    /// # Errors
    ///
    /// As [`DaemonClient::request`].
    pub async fn ping(&mut self) -> Result<bool> {
        let response = self.request("ping", serde_json::json!({})).await?;
        Ok(response.status == "ok")
    }
}

//! End-to-end daemon tests over a real Unix socket.

use eluent::config::UserContext;
use eluent::store::RecordStore;
use eluentd::{Daemon, DaemonClient, MAX_FRAME_BYTES};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Start a daemon on a temp data root and wait for its socket.
async fn start_daemon(data_root: &Path) -> tokio::task::JoinHandle<()> {
    let user = UserContext::new(Some(data_root));
    let socket = user.socket_path();

    let handle = tokio::spawn(async move {
        Daemon::new(user).run().await.expect("daemon run failed");
    });

    for _ in 0..100 {
        if socket.exists() {
            return handle;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

#[tokio::test]
async fn ping_and_shutdown_round_trip() {
    let data = tempdir().unwrap();
    let handle = start_daemon(data.path()).await;
    let user = UserContext::new(Some(data.path()));

    // PID file names this process.
    let pid = std::fs::read_to_string(user.pid_path()).unwrap();
    assert_eq!(pid, std::process::id().to_string());

    let mut client = DaemonClient::connect(&user.socket_path()).await.unwrap();
    assert!(client.ping().await.unwrap());

    let response = client.request("shutdown", json!({})).await.unwrap();
    assert_eq!(response.status, "ok");

    // Daemon exits and cleans up its socket and PID file.
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("daemon did not stop")
        .unwrap();
    assert!(!user.socket_path().exists());
    assert!(!user.pid_path().exists());
}

#[tokio::test]
async fn repo_commands_work_over_the_socket() {
    let data = tempdir().unwrap();
    let repo = tempdir().unwrap();
    RecordStore::init(repo.path(), "socket").await.unwrap();

    let handle = start_daemon(data.path()).await;
    let user = UserContext::new(Some(data.path()));
    let mut client = DaemonClient::connect(&user.socket_path()).await.unwrap();
    let repo_path = repo.path().to_str().unwrap();

    let created = client
        .request(
            "create",
            json!({"repo_path": repo_path, "title": "Over the wire", "priority": 1}),
        )
        .await
        .unwrap();
    assert_eq!(created.status, "ok");
    let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

    let claimed = client
        .request(
            "claim",
            json!({"repo_path": repo_path, "id": id, "agent": "wire-agent"}),
        )
        .await
        .unwrap();
    assert_eq!(claimed.status, "ok");
    assert_eq!(claimed.data.unwrap()["outcome"], "success");

    // Conflicting claim comes back as a structured error.
    let conflicted = client
        .request(
            "claim",
            json!({"repo_path": repo_path, "id": id, "agent": "other-agent"}),
        )
        .await
        .unwrap();
    assert_eq!(conflicted.status, "error");
    let error = conflicted.error.unwrap();
    assert_eq!(error.code, "conflict");
    assert_eq!(error.details.unwrap()["owner"], "wire-agent");

    client.request("shutdown", json!({})).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn oversized_frames_are_rejected_before_parsing() {
    let data = tempdir().unwrap();
    let handle = start_daemon(data.path()).await;
    let user = UserContext::new(Some(data.path()));

    let mut stream = UnixStream::connect(user.socket_path()).await.unwrap();
    // Declare an 11 MiB frame; send no body.
    stream
        .write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes())
        .await
        .unwrap();
    stream.flush().await.unwrap();

    // The daemon answers with message_too_large and closes the
    // connection without waiting for the body.
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.unwrap();
    let len = u32::from_be_bytes(prefix) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();

    let response: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"]["code"], "message_too_large");

    // Connection is closed after the rejection.
    let mut rest = Vec::new();
    let read = stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(read, 0);

    // Daemon is still healthy for other clients.
    let mut client = DaemonClient::connect(&user.socket_path()).await.unwrap();
    assert!(client.ping().await.unwrap());
    client.request("shutdown", json!({})).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn second_daemon_instance_is_refused() {
    let data = tempdir().unwrap();
    let handle = start_daemon(data.path()).await;
    let user = UserContext::new(Some(data.path()));

    let second = Daemon::new(UserContext::new(Some(data.path())));
    let err = second.run().await.unwrap_err();
    assert!(matches!(err, eluentd::DaemonError::AlreadyRunning(_)));

    let mut client = DaemonClient::connect(&user.socket_path()).await.unwrap();
    client.request("shutdown", json!({})).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn errors_for_unknown_repo_are_structured() {
    let data = tempdir().unwrap();
    let handle = start_daemon(data.path()).await;
    let user = UserContext::new(Some(data.path()));
    let mut client = DaemonClient::connect(&user.socket_path()).await.unwrap();

    let missing_dir = tempdir().unwrap();
    let response = client
        .request(
            "list",
            json!({"repo_path": missing_dir.path().to_str().unwrap()}),
        )
        .await
        .unwrap();
    assert_eq!(response.status, "error");
    assert_eq!(response.error.unwrap().code, "not_initialized");

    client.request("shutdown", json!({})).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

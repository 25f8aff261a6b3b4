//! The daemon: a Unix-socket RPC server with per-repo instance caching.
//!
//! One instance per user. The socket and PID file live under the user
//! data root; a live socket refuses a second instance, a dead one is
//! cleaned up and reclaimed. Each connection is served by its own task;
//! per-repository serialization happens inside the record store, not here.

use crate::context::{DaemonContext, RepoHandle};
use crate::error::{DaemonError, Result};
use crate::protocol::{read_message, write_message, Request, Response};
use eluent::config::{OfflineMode, UserContext};
use eluent::domain::{
    AtomFilter, AtomId, AtomUpdate, BondKind, IssueType, NewAtom, SortPolicy, Status,
};
use eluent::store::offline_claim;
use eluent::sync::{ClaimOutcome, Git, SyncOptions, SyncOrchestrator, SyncOutcome};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// The daemon server.
pub struct Daemon {
    context: Arc<DaemonContext>,
}

impl Daemon {
    /// A daemon for the given user context.
    #[must_use]
    pub fn new(user: UserContext) -> Self {
        Self {
            context: Arc::new(DaemonContext::new(user)),
        }
    }

    /// Bind the socket, write the PID file, and serve until `shutdown`
    /// is requested (by RPC or signal).
    ///
    /// # Errors
    ///
    /// [`DaemonError::AlreadyRunning`] when another instance owns the
    /// socket; bind and IO failures.
    pub async fn run(&self) -> Result<()> {
        let socket_path = self.context.user().socket_path();
        let pid_path = self.context.user().pid_path();
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // A leftover socket file is only a conflict if something answers.
        if socket_path.exists() {
            if UnixStream::connect(&socket_path).await.is_ok() {
                return Err(DaemonError::AlreadyRunning(
                    socket_path.display().to_string(),
                ));
            }
            tracing::info!(path = %socket_path.display(), "removing stale socket");
            tokio::fs::remove_file(&socket_path).await?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        tokio::fs::write(&pid_path, std::process::id().to_string()).await?;
        tracing::info!(socket = %socket_path.display(), pid = std::process::id(), "daemon listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let context = self.context.clone();
                    let shutdown = shutdown_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, context, shutdown).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                _ = shutdown_rx.changed() => break,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received; shutting down");
                    break;
                }
            }
        }

        let _ = tokio::fs::remove_file(&socket_path).await;
        let _ = tokio::fs::remove_file(&pid_path).await;
        Ok(())
    }
}

async fn serve_connection(
    stream: UnixStream,
    context: Arc<DaemonContext>,
    shutdown: watch::Sender<bool>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let request: Request = match read_message(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e @ DaemonError::MessageTooLarge { .. }) => {
                // Reject before parsing, answer once, and drop the
                // connection: the unread body would desynchronize framing.
                write_message(&mut writer, &Response::error(0, &e)).await?;
                return Ok(());
            }
            Err(e) => {
                write_message(&mut writer, &Response::error(0, &e)).await?;
                return Ok(());
            }
        };

        let is_shutdown = request.cmd == "shutdown";
        let response = match handle_command(&context, &request.cmd, &request.args).await {
            Ok(data) => Response::ok(request.id, data),
            Err(e) => Response::error(request.id, &e),
        };
        write_message(&mut writer, &response).await?;

        if is_shutdown {
            let _ = shutdown.send(true);
            return Ok(());
        }
    }
}

/// Dispatch one command. Exposed for in-process testing.
///
/// # Errors
///
/// Any [`DaemonError`]; the caller turns it into an error response.
pub async fn handle_command(
    context: &DaemonContext,
    cmd: &str,
    args: &Value,
) -> Result<Value> {
    match cmd {
        "ping" => Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")})),
        "shutdown" => Ok(json!({"stopping": true})),
        _ => {
            let repo_path = arg_str(args, "repo_path")?;
            let handle = context.repo(&repo_path).await?;
            repo_command(context, &handle, cmd, args).await
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn repo_command(
    context: &DaemonContext,
    handle: &Arc<RepoHandle>,
    cmd: &str,
    args: &Value,
) -> Result<Value> {
    match cmd {
        "create" => {
            let new_atom = NewAtom {
                title: arg_str(args, "title")?,
                description: arg_opt_str(args, "description").unwrap_or_default(),
                priority: arg_opt(args, "priority")?
                    .unwrap_or(handle.config.defaults.priority),
                issue_type: arg_opt(args, "issue_type")?
                    .unwrap_or(handle.config.defaults.issue_type),
                labels: arg_opt(args, "labels")?.unwrap_or_default(),
                assignee: arg_opt_str(args, "assignee"),
                parent_id: match arg_opt_str(args, "parent_id") {
                    Some(input) => Some(handle.store.resolve_id(&input).await?),
                    None => None,
                },
                defer_until: arg_opt(args, "defer_until")?,
                metadata: arg_opt(args, "metadata")?.unwrap_or_default(),
                ephemeral: arg_opt(args, "ephemeral")?.unwrap_or(false),
            };
            let atom = handle.store.create_atom(new_atom).await?;
            Ok(serde_json::to_value(atom)?)
        }

        "get" => {
            let atom_id = resolve_arg(handle, args, "id").await?;
            let atom = handle
                .store
                .get_atom(&atom_id)
                .await
                .ok_or_else(|| eluent::Error::NotFound(atom_id.to_string()))
                .map_err(DaemonError::Core)?;
            let comments = handle.store.comments(&atom_id).await;
            let short = handle.store.shorten_id(&atom_id).await;
            let blocked = handle.store.is_blocked(&atom_id).await?;
            Ok(json!({
                "atom": atom,
                "comments": comments,
                "short_id": short,
                "blocked": blocked,
            }))
        }

        "update" => {
            let atom_id = resolve_arg(handle, args, "id").await?;
            let update = AtomUpdate {
                title: arg_opt_str(args, "title"),
                description: arg_opt_str(args, "description"),
                status: arg_opt::<Status>(args, "status")?,
                issue_type: arg_opt::<IssueType>(args, "issue_type")?,
                priority: arg_opt(args, "priority")?,
                assignee: clearable(args, "assignee")?,
                defer_until: clearable(args, "defer_until")?,
                close_reason: clearable(args, "close_reason")?,
                labels: arg_opt(args, "labels")?,
                metadata: arg_opt(args, "metadata")?,
            };
            let atom = handle.store.update_atom(&atom_id, update).await?;
            Ok(serde_json::to_value(atom)?)
        }

        "list" => {
            let filter = parse_filter(args)?;
            let atoms = handle.store.list(&filter).await;
            Ok(serde_json::to_value(atoms)?)
        }

        "ready" => {
            let filter = parse_filter(args)?;
            let policy: SortPolicy = arg_opt(args, "policy")?.unwrap_or_default();
            let atoms = handle
                .store
                .ready(&filter, policy, chrono::Utc::now())
                .await;
            Ok(serde_json::to_value(atoms)?)
        }

        "claim" => claim(handle, args).await,

        "release" => {
            let atom_id = resolve_arg(handle, args, "id").await?;
            match &handle.ledger {
                Some(ledger) if ledger.available().await.unwrap_or(false) => {
                    ledger.release_claim(&atom_id).await?;
                    ledger.sync_to_main()?;
                    handle.store.reload().await?;
                }
                _ => {
                    handle.store.release_atom(&atom_id).await?;
                }
            }
            Ok(json!({"released": atom_id.to_string()}))
        }

        "heartbeat" => {
            let atom_id = resolve_arg(handle, args, "id").await?;
            match &handle.ledger {
                Some(ledger) if ledger.available().await.unwrap_or(false) => {
                    ledger.heartbeat(&atom_id).await?;
                }
                _ => {
                    handle.store.heartbeat_atom(&atom_id).await?;
                }
            }
            Ok(json!({"heartbeat": atom_id.to_string()}))
        }

        "comment" => {
            let atom_id = resolve_arg(handle, args, "id").await?;
            let comment = handle
                .store
                .add_comment(
                    &atom_id,
                    &arg_str(args, "author")?,
                    &arg_str(args, "content")?,
                )
                .await?;
            Ok(serde_json::to_value(comment)?)
        }

        "bond" => {
            let source = resolve_arg(handle, args, "source").await?;
            let target = resolve_arg(handle, args, "target").await?;
            let kind: BondKind = arg_required(args, "kind")?;
            let bond = handle.store.add_bond(&source, &target, kind).await?;
            Ok(serde_json::to_value(bond)?)
        }

        "unbond" => {
            let source = resolve_arg(handle, args, "source").await?;
            let target = resolve_arg(handle, args, "target").await?;
            let kind: BondKind = arg_required(args, "kind")?;
            handle.store.remove_bond(&source, &target, kind).await?;
            Ok(json!({"removed": true}))
        }

        "resolve_id" => {
            let atom_id = resolve_arg(handle, args, "input").await?;
            let short = handle.store.shorten_id(&atom_id).await;
            Ok(json!({"id": atom_id.to_string(), "short_id": short}))
        }

        "sync" => {
            let options = SyncOptions {
                pull_only: arg_opt(args, "pull_only")?.unwrap_or(false),
                push_only: arg_opt(args, "push_only")?.unwrap_or(false),
                dry_run: arg_opt(args, "dry_run")?.unwrap_or(false),
                force: arg_opt(args, "force")?.unwrap_or(false),
            };
            let git = Git::new(&handle.repo_root)
                .with_network_timeout(handle.config.network_timeout());
            let orchestrator = SyncOrchestrator::new(
                handle.repo_root.clone(),
                handle.store.clone(),
                git,
            );
            let outcome = orchestrator.sync(options).await?;
            Ok(sync_outcome_json(&outcome))
        }

        "ledger_sync" => ledger_sync(context, handle, args).await,

        other => Err(DaemonError::UnknownCommand(other.to_string())),
    }
}

async fn claim(handle: &Arc<RepoHandle>, args: &Value) -> Result<Value> {
    let atom_id = resolve_arg(handle, args, "id").await?;
    let agent_id = arg_str(args, "agent")?;

    let Some(ledger) = &handle.ledger else {
        let atom = handle.store.claim_atom(&atom_id, &agent_id).await?;
        return Ok(json!({"outcome": "success", "retries": 0, "atom": atom}));
    };

    if ledger.available().await.unwrap_or(false) {
        let outcome = ledger.claim_and_push(&atom_id, &agent_id).await?;
        if matches!(outcome, ClaimOutcome::Success { .. }) {
            ledger.sync_to_main()?;
            handle.store.reload().await?;
        }
        return Ok(serde_json::to_value(outcome)?);
    }

    // Ledger configured but unreachable.
    match handle.config.sync.offline_mode {
        OfflineMode::Fail => Err(DaemonError::LedgerUnavailable),
        OfflineMode::Local => {
            let atom = handle.store.claim_atom(&atom_id, &agent_id).await?;
            ledger
                .state_store()
                .record_offline_claim(offline_claim(&atom_id, &agent_id))?;
            tracing::info!(atom = %atom_id, agent = %agent_id, "recorded offline claim");
            Ok(json!({
                "outcome": "success",
                "retries": 0,
                "offline": true,
                "atom": atom,
            }))
        }
    }
}

async fn ledger_sync(
    context: &DaemonContext,
    handle: &Arc<RepoHandle>,
    args: &Value,
) -> Result<Value> {
    let action = arg_str(args, "action")?;

    // `status` answers even when the ledger is unconfigured.
    if action == "status" {
        return match &handle.ledger {
            None => Ok(json!({"configured": false})),
            Some(ledger) => {
                let status = ledger.status().await?;
                let mut value = serde_json::to_value(status)?;
                value["configured"] = json!(true);
                Ok(value)
            }
        };
    }

    let ledger = handle.ledger()?;
    match action.as_str() {
        "setup" => {
            ledger.setup().await?;
            Ok(json!({"setup": true}))
        }
        "teardown" => {
            ledger.teardown().await?;
            Ok(json!({"teardown": true}))
        }
        "pull" => {
            ledger.pull().await?;
            let copied = ledger.sync_to_main()?;
            handle.store.reload().await?;
            Ok(json!({"pulled": true, "files_copied": copied}))
        }
        "push" => {
            ledger.seed_from_main()?;
            let committed = ledger.push("eluent: push local records to ledger").await?;
            Ok(json!({"pushed": true, "committed": committed}))
        }
        "reconcile" => reconcile(ledger).await,
        "force_resync" => {
            ledger.setup().await?;
            ledger.pull().await?;
            ledger.sync_to_main()?;
            handle.store.reload().await?;
            context.evict(&handle.repo_root.to_string_lossy()).await;
            Ok(json!({"resynced": true}))
        }
        other => Err(DaemonError::InvalidRequest(format!(
            "unknown ledger_sync action: {other}"
        ))),
    }
}

/// Replay queued offline claims against the (now reachable) ledger.
/// Claims that land are dropped from the queue; claims that conflict or
/// are rejected stay queued and are reported, never silently discarded.
async fn reconcile(ledger: &eluent::sync::LedgerSyncer) -> Result<Value> {
    let state = ledger.state_store().load()?;
    let mut results = Vec::new();
    let mut resolved: Vec<AtomId> = Vec::new();

    for claim in &state.offline_claims {
        let outcome = ledger
            .claim_and_push(&claim.atom_id, &claim.agent_id)
            .await?;
        if matches!(outcome, ClaimOutcome::Success { .. }) {
            resolved.push(claim.atom_id.clone());
        }
        results.push(json!({
            "atom_id": claim.atom_id.to_string(),
            "agent_id": claim.agent_id,
            "result": outcome,
        }));
    }

    ledger
        .state_store()
        .retain_offline_claims(|claim| !resolved.contains(&claim.atom_id))?;

    Ok(json!({
        "reconciled": resolved.len(),
        "remaining": state.offline_claims.len() - resolved.len(),
        "results": results,
    }))
}

fn sync_outcome_json(outcome: &SyncOutcome) -> Value {
    match outcome {
        SyncOutcome::UpToDate => json!({"result": "up_to_date"}),
        SyncOutcome::Synced {
            conflicts,
            skipped_lines,
            committed,
            pushed,
            held_back,
        } => json!({
            "result": "synced",
            "conflicts": conflicts,
            "skipped_lines": skipped_lines,
            "committed": committed,
            "pushed": pushed,
            "held_back": held_back,
        }),
        SyncOutcome::DryRun {
            conflicts,
            would_change,
        } => json!({
            "result": "dry_run",
            "conflicts": conflicts,
            "would_change": would_change,
        }),
        SyncOutcome::Pushed { committed } => {
            json!({"result": "pushed", "committed": committed})
        }
    }
}

// ---- Argument helpers ------------------------------------------------------

fn arg_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| DaemonError::InvalidRequest(format!("missing argument: {key}")))
}

fn arg_opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn arg_opt<T: serde::de::DeserializeOwned>(args: &Value, key: &str) -> Result<Option<T>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            DaemonError::InvalidRequest(format!("bad value for {key}: {e}"))
        }),
    }
}

fn arg_required<T: serde::de::DeserializeOwned>(args: &Value, key: &str) -> Result<T> {
    arg_opt(args, key)?
        .ok_or_else(|| DaemonError::InvalidRequest(format!("missing argument: {key}")))
}

/// Double-`Option` parsing: absent key leaves the field alone, explicit
/// `null` clears it, a value sets it.
fn clearable<T: serde::de::DeserializeOwned>(
    args: &Value,
    key: &str,
) -> Result<Option<Option<T>>> {
    match args.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(value) => serde_json::from_value(value.clone())
            .map(|parsed| Some(Some(parsed)))
            .map_err(|e| DaemonError::InvalidRequest(format!("bad value for {key}: {e}"))),
    }
}

async fn resolve_arg(handle: &Arc<RepoHandle>, args: &Value, key: &str) -> Result<AtomId> {
    let input = arg_str(args, key)?;
    Ok(handle.store.resolve_id(&input).await?)
}

fn parse_filter(args: &Value) -> Result<AtomFilter> {
    Ok(AtomFilter {
        status: arg_opt(args, "status")?,
        issue_type: arg_opt(args, "issue_type")?,
        assignee: arg_opt_str(args, "assignee"),
        labels: arg_opt(args, "labels")?.unwrap_or_default(),
        priority: arg_opt(args, "priority")?,
        include_abstract: arg_opt(args, "include_abstract")?.unwrap_or(false),
        limit: arg_opt(args, "limit")?,
    })
}

//! The eluentd binary.

use anyhow::Result;
use clap::Parser;
use eluent::config::UserContext;
use eluentd::Daemon;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Local RPC daemon for eluent work tracking.
#[derive(Debug, Parser)]
#[command(name = "eluentd", version, about)]
struct Args {
    /// Override the per-user data root (socket, PID file, worktrees).
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Log filter, e.g. `info` or `eluent=debug`.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let user = UserContext::new(args.data_root.as_deref());
    Daemon::new(user).run().await?;
    Ok(())
}

//! The watching client.

use clap::Parser;
use driftsync::client::SyncClient;
use driftsync::config::{SyncConfig, DEFAULT_SERVER_URL};
use driftsync::index::SqliteIndex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Watch the local storage tree and keep it synchronized through the relay.
#[derive(Parser, Debug)]
#[command(name = "driftsync", about = "Sync a local storage tree through a driftsync relay")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, default_value = DEFAULT_SERVER_URL, env = "DRIFTSYNC_SERVER")]
    server: String,

    /// Path of the SQLite file index
    #[arg(long, default_value = "driftsync.db", env = "DRIFTSYNC_DB")]
    index: PathBuf,

    /// Directory containing the storage tree
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(err) = run(Args::parse()).await {
        error!(%err, "client exited with error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::new(args.root);
    let index = Arc::new(SqliteIndex::open(&args.index)?);
    let client = SyncClient::new(config, index, args.server)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    client.run(shutdown).await?;
    Ok(())
}

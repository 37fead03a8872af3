//! The relay server daemon.

use clap::Parser;
use driftsync::config::{SyncConfig, DEFAULT_MAX_CONNS};
use driftsync::fsops;
use driftsync::hub::ServerHub;
use driftsync::index::SqliteIndex;
use driftsync::relay::RelayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Relay server: owns the canonical storage tree and fans client events out
/// to every other connected peer.
#[derive(Parser, Debug)]
#[command(name = "driftsync-server", about = "Relay server for driftsync peers")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Path of the SQLite file index
    #[arg(long, default_value = "driftsync.db", env = "DRIFTSYNC_DB")]
    index: PathBuf,

    /// Directory containing the storage tree
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Maximum concurrent client connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNS)]
    max_conns: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(err) = run(Args::parse()).await {
        error!(%err, "server exited with error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::new(args.root);
    fsops::make_storage(&config)?;

    let index = Arc::new(SqliteIndex::open(&args.index)?);
    let hub = ServerHub::new(config, index);
    let server = RelayServer::new(hub, args.max_conns);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let listener = TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "relay server listening");
    axum::serve(
        listener,
        server
            .router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;
    Ok(())
}

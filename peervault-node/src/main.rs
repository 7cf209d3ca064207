//! PeerVault storage node daemon
//!
//! Runs a storage node that:
//! - Keeps a content-addressed local shard store with quota and GC
//! - Serves shard upload/download and audit challenges to peers
//! - Registers with the coordinator and heartbeats every 30 seconds
//! - Periodically discovers peers and audits shard holders

use clap::Parser;
use peervault_node::{Node, NodeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "peervault-node")]
#[command(about = "PeerVault storage node daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Coordinator base URL (overrides config file)
    #[arg(long)]
    coordinator_url: Option<String>,

    /// Data directory (overrides config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Peer service port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Priority: CLI args > env vars > config file > defaults
    let config = NodeConfig::load_or_default(&cli.config)
        .with_env_overrides()
        .with_overrides(cli.coordinator_url, cli.data_dir, cli.port);

    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        return Err(e.into());
    }

    let port = config.node.port;
    let node = Arc::new(Node::new(config)?);

    info!(
        peer_id = %node.identity().peer_id,
        port,
        data_dir = ?node.config().node.data_dir,
        coordinator = %node.config().coordinator.url,
        "PeerVault node starting"
    );

    // First registration is best-effort; the heartbeat loop keeps retrying
    if let Err(e) = node.register().await {
        warn!(error = %e, "Initial coordinator registration failed");
    }

    node.spawn_background_tasks();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(addr = %listener.local_addr()?, "Peer service listening");

    axum::serve(listener, peervault_node::server::router(node.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Err(e) = node.deregister("shutdown").await {
        warn!(error = %e, "Coordinator deregistration failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wsyncd::config::{Args, ServerConfig};
use wsyncd::metrics::{start_metrics_server, HealthState};
use wsyncd::run_with_shutdown;
use wsyncd::ServerState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let peer_listener = TcpListener::bind(config.peer_listen).await?;
    let viewer_listener = TcpListener::bind(config.viewer_listen).await?;
    info!(
        "bound peer listener to {} and viewer listener to {}",
        config.peer_listen, config.viewer_listen
    );

    let health_state = HealthState::new();
    let metrics_addr = config.metrics_addr;
    tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let state = Arc::new(ServerState::new(config));

    // ctrl-c flips the shutdown channel; the accept loops stop and drain
    // instead of being cancelled mid-connection.
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = signal_tx.send(());
        }
    });

    if let Err(e) = run_with_shutdown(peer_listener, viewer_listener, state, shutdown_tx).await {
        tracing::error!("relay error: {}", e);
    }

    Ok(())
}

//! Sync command implementation.

use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use k2s_core::engine::build_product_engine;
use k2s_core::Config;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the stream loop until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    info!(
        topic = %config.kafka.topic,
        group = %config.kafka.consumer_group,
        store = %config.store.base_url,
        commit_policy = ?config.sync.commit_policy,
        "Starting product sync"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let mut engine = build_product_engine(&config).context("Failed to build sync engine")?;
    let shutdown_tx = engine.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: Arc::clone(engine.health()),
        metrics: Arc::clone(engine.metrics()),
        offsets: Arc::clone(engine.offsets()),
    });

    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(wait_for_signal(shutdown_tx));

    engine.run().await?;

    info!("Product sync stopped");
    Ok(())
}

/// Send the shutdown signal on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C stops the sync");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}

// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::replication;
use crate::core::storage::ExpireSweeper;
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if server_state.config.metrics.enabled {
        let metrics_state = server_state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Keyspace Maintenance ---
    let sweeper = ExpireSweeper::new(server_state.clone());
    let shutdown_rx_sweep = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sweeper.run(shutdown_rx_sweep).await;
        Ok(())
    });

    // --- Replication ---
    let master = server_state.master.clone();
    let shutdown_rx_heartbeat = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        master.run_heartbeat(shutdown_rx_heartbeat).await;
        Ok(())
    });

    let control_rx = ctx
        .slave_control_rx
        .take()
        .ok_or_else(|| anyhow!("The slave daemon has already been started"))?;
    let repl_state = server_state.clone();
    let shutdown_rx_repl = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        replication::run_daemon(repl_state, control_rx, shutdown_rx_repl).await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}

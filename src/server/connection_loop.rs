// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::metrics;
use crate::core::persistence::{acquire_bgsave, save_store};
use crate::core::state::{ClientInfo, ShutdownRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long a final save waits for a running background dump.
const FINAL_SAVE_WAIT: Duration = Duration::from_secs(60);

/// Resolves when the process receives SIGINT or SIGTERM. A handler that cannot be
/// installed is logged and never fires.
async fn termination_signal() -> &'static str {
    let mut sigint = signal(SignalKind::interrupt())
        .inspect_err(|e| error!("Failed to register SIGINT handler: {}", e))
        .ok();
    let mut sigterm = signal(SignalKind::terminate())
        .inspect_err(|e| error!("Failed to register SIGTERM handler: {}", e))
        .ok();

    tokio::select! {
        Some(_) = async { sigint.as_mut()?.recv().await } => "SIGINT",
        Some(_) = async { sigterm.as_mut()?.recv().await } => "SIGTERM",
        else => std::future::pending::<&'static str>().await,
    }
}

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    let signal = termination_signal();
    tokio::pin!(signal);

    let request = loop {
        tokio::select! {
            biased;

            name = &mut signal => {
                info!("{} received, initiating graceful shutdown.", name);
                break ShutdownRequest { save: true };
            }

            Some(request) = ctx.shutdown_request_rx.recv() => {
                info!("SHUTDOWN requested by a client (save: {}).", request.save);
                break request;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break ShutdownRequest { save: true }; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break ShutdownRequest { save: true }; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new connection from: {}", addr);
                        ctx.state.stats.increment_total_connections();
                        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();
                        metrics::CONNECTED_CLIENTS.inc();

                        session_id_counter = session_id_counter.wrapping_add(1);
                        let session_id = session_id_counter;
                        let state_clone = ctx.state.clone();

                        let (conn_shutdown_tx, conn_shutdown_rx) = broadcast::channel(1);
                        let global_shutdown_rx = ctx.shutdown_tx.subscribe();

                        let client_info = Arc::new(Mutex::new(ClientInfo::new(addr, session_id)));
                        state_clone.clients.insert(session_id, (client_info, conn_shutdown_tx));

                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(socket, addr, state_clone, session_id, conn_shutdown_rx, global_shutdown_rx);
                            if let Err(e) = handler.run().await {
                                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    };

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was subscribed to the shutdown signal.");
    }

    ctx.state.master.close();
    client_tasks.shutdown().await;
    info!("All client connections closed.");

    if request.save {
        final_save(&ctx).await;
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}

/// Writes the dump file before exiting, waiting for a running background dump first.
async fn final_save(ctx: &ServerContext) {
    let path = &ctx.state.config.dump_filepath;
    let permit = match acquire_bgsave(&ctx.state.bgsave, FINAL_SAVE_WAIT).await {
        Ok(permit) => permit,
        Err(e) => {
            error!("CRITICAL: Final save skipped: {}", e);
            return;
        }
    };
    info!("Performing final save to '{}'...", path);
    match save_store(&ctx.state.store, path).await {
        Ok(_) => info!("Final save completed successfully."),
        Err(e) => error!("CRITICAL: Final save on shutdown failed: {}", e),
    }
    drop(permit);
}

// src/server/initialization.rs

//! Handles the complete server initialization process, from state setup to loading
//! the dump file and binding the listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::persistence::load_dump_file;
use crate::core::state::{LogReloadHandle, ServerState};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(
    mut config: Config,
    log_reload_handle: Arc<LogReloadHandle>,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
    let local_addr = listener.local_addr()?;
    // An ephemeral port is resolved here so that `SLAVEOF` announces the real one.
    if addr.port() == 0 {
        config.set_port(local_addr.port())?;
    }

    let server_init = ServerState::initialize(config, log_reload_handle)?;
    let server_state = server_init.state.clone();
    info!("Server state initialized.");

    load_persistence_data(&server_state).await?;
    info!("QDB server listening on {}", local_addr);

    Ok(ServerContext {
        state: server_state,
        slave_control_rx: Some(server_init.slave_control_rx),
        shutdown_request_rx: server_init.shutdown_request_rx,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!("Server configured with {} databases.", config.databases);
    info!(
        "Replication backlog: {} bytes at '{}', released after {}s without slaves.",
        config.repl_backlog_size, config.repl_backlog_file_path, config.repl_backlog_ttl
    );
    if config.auth.is_empty() {
        info!("No 'auth' password configured. Clients are not required to authenticate.");
    }
}

/// Creates the dump directory and loads the dump file when one exists.
async fn load_persistence_data(server_state: &Arc<ServerState>) -> Result<()> {
    let path_str = server_state.config.dump_filepath.clone();
    let path = std::path::Path::new(&path_str);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            anyhow!(
                "Failed to create persistence directory '{}': {}",
                parent.display(),
                e
            )
        })?;
        info!("Created persistence directory: {}", parent.display());
    }

    match load_dump_file(server_state.store.clone(), &path_str).await? {
        Some(keys) => info!("Loaded {} keys from '{}'.", keys, path_str),
        None => info!("No dump file at '{}'. Starting with an empty state.", path_str),
    }
    Ok(())
}

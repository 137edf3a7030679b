// src/server/mod.rs

//! Server lifecycle: initialization, background tasks and the accept loop.

use crate::config::Config;
use crate::core::state::{LogReloadHandle, ServerState};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

use context::ServerContext;

/// A fully initialized server whose background tasks are running and whose
/// listener is bound, but which does not accept connections until `serve`.
pub struct Server {
    ctx: ServerContext,
    local_addr: SocketAddr,
}

impl Server {
    /// Builds the shared state, loads the dump, binds the listener and spawns the
    /// background tasks.
    pub async fn bind(config: Config, log_reload_handle: Arc<LogReloadHandle>) -> Result<Self> {
        let mut ctx = initialization::setup(config, log_reload_handle).await?;
        let local_addr = ctx.listener.local_addr()?;
        spawner::spawn_all(&mut ctx)?;
        Ok(Self { ctx, local_addr })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.ctx.state.clone()
    }

    /// Runs the accept loop until a signal or `SHUTDOWN` stops the server.
    pub async fn serve(self) {
        connection_loop::run(self.ctx).await;
    }
}

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config, log_reload_handle: Arc<LogReloadHandle>) -> Result<()> {
    Server::bind(config, log_reload_handle).await?.serve().await;
    Ok(())
}

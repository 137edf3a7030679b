// src/server/context.rs

use crate::core::replication::FollowRequest;
use crate::core::state::{ServerState, ShutdownRequest};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    /// Taken by the spawner when the slave daemon starts.
    pub slave_control_rx: Option<mpsc::Receiver<FollowRequest>>,
    pub shutdown_request_rx: mpsc::Receiver<ShutdownRequest>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}

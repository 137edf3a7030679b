// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::ClientMap;
use super::stats::StatsState;
use crate::config::Config;
use crate::core::QdbError;
use crate::core::replication::{
    FollowRequest, MasterConfig, ReplicationFeedHook, ReplicationMaster, ReplicationSlave,
    generate_run_id,
};
use crate::core::storage::Store;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

pub type LogReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// A `SHUTDOWN` issued by a client, forwarded to the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// Whether the dump is written before exiting.
    pub save: bool,
}

/// Contains all initialized components required to spawn the server's background tasks.
/// This struct is created once during server initialization and then consumed by the spawner.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// Role changes requested through `SLAVEOF`, consumed by the slave daemon.
    pub slave_control_rx: mpsc::Receiver<FollowRequest>,
    /// `SHUTDOWN` requests, consumed by the accept loop.
    pub shutdown_request_rx: mpsc::Receiver<ShutdownRequest>,
}

/// The central struct holding all shared, server-wide state.
/// This struct is wrapped in an `Arc` and passed to every task and connection handler.
pub struct ServerState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub master: Arc<ReplicationMaster>,
    pub slave: Arc<ReplicationSlave>,
    /// A map of all active client connections, keyed by a unique session ID.
    /// Stores client metadata and a kill sender for targeted connection termination.
    pub clients: ClientMap,
    /// The process-wide bgsave slot shared by `BGSAVE`, `BGSAVETO` and full resyncs.
    pub bgsave: Arc<Semaphore>,
    pub shutdown_request_tx: mpsc::Sender<ShutdownRequest>,
    /// A handle to the logging filter, allowing for dynamic log level changes.
    pub log_reload_handle: Arc<LogReloadHandle>,
    pub stats: StatsState,
    pub started_at: Instant,
}

impl ServerState {
    /// Initializes the entire server state from the given configuration.
    /// This is the main factory function for creating the server's shared context.
    pub fn initialize(
        config: Config,
        log_reload_handle: Arc<LogReloadHandle>,
    ) -> Result<ServerInit, QdbError> {
        // Generate a unique run ID for this server instance, used for replication.
        let run_id = generate_run_id().map_err(|e| QdbError::Internal(e.to_string()))?;
        info!("Replication run id: {}", run_id);

        let store = Arc::new(Store::new(config.databases));
        let master = Arc::new(ReplicationMaster::new(run_id, MasterConfig::from(&config)));
        store.add_hook(Arc::new(ReplicationFeedHook::new(Arc::downgrade(&master))));

        let (slave, slave_control_rx) = ReplicationSlave::new();
        let (shutdown_request_tx, shutdown_request_rx) = mpsc::channel(1);

        let state = Arc::new(Self {
            config: Arc::new(config),
            store,
            master,
            slave: Arc::new(slave),
            clients: Arc::new(DashMap::new()),
            bgsave: Arc::new(Semaphore::new(1)),
            shutdown_request_tx,
            log_reload_handle,
            stats: StatsState::new(),
            started_at: Instant::now(),
        });

        Ok(ServerInit {
            state,
            slave_control_rx,
            shutdown_request_rx,
        })
    }

    /// True when `AUTH` must succeed before other commands are accepted.
    pub fn requires_auth(&self) -> bool {
        !self.config.auth.is_empty()
    }
}

// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::metrics;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Removes the client from the global map and, for a connection that became a slave,
/// unregisters it from the master, however the handler exits.
pub struct ConnectionGuard {
    pub(crate) state: Arc<ServerState>,
    pub(crate) session_id: u64,
    pub(crate) addr: SocketAddr,
    pub(crate) is_slave: bool,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, session_id: u64, addr: SocketAddr) -> Self {
        Self {
            state,
            session_id,
            addr,
            is_slave: false,
        }
    }

    pub(crate) fn set_slave(&mut self) {
        self.is_slave = true;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.addr
        );

        if self.is_slave {
            self.state.master.unregister_slave(self.session_id);
        }
        if self.state.clients.remove(&self.session_id).is_none() {
            debug!(
                "Client {} was not in the global state map upon cleanup.",
                self.addr
            );
        }
    }
}

// src/core/state/client.rs

//! Contains state definitions related to client connections.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use strum_macros::Display;
use tokio::sync::{Mutex, broadcast};

pub type ShutdownSender = broadcast::Sender<()>;
pub type ClientStateTuple = (Arc<Mutex<ClientInfo>>, ShutdownSender);
pub type ClientMap = Arc<DashMap<u64, ClientStateTuple>>;

/// What the peer on a connection is to this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ClientRole {
    Normal,
    /// The connection issued `SYNC`/`PSYNC` and is fed the replication stream.
    Slave,
}

#[derive(Debug)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub session_id: u64,
    pub db_index: usize,
    pub role: ClientRole,
    pub created: Instant,
    pub last_command_time: Instant,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr, session_id: u64) -> Self {
        Self {
            addr,
            session_id,
            db_index: 0,
            role: ClientRole::Normal,
            created: Instant::now(),
            last_command_time: Instant::now(),
        }
    }
}

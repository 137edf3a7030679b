// src/connection/session.rs

//! Defines the state associated with a single client session.

/// Holds the state specific to a single client session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: u64,
    /// True if the client has successfully authenticated.
    pub is_authenticated: bool,
    /// The index of the database the client is currently using.
    pub current_db: usize,
    /// True for the slave's internal session that applies the master's stream.
    pub is_master_link: bool,
    /// Announced through `REPLCONF listening-port`; 0 until then.
    pub listening_port: u16,
}

impl SessionState {
    /// Creates a new `SessionState` with default values.
    pub fn new(session_id: u64, is_auth_required: bool) -> Self {
        Self {
            session_id,
            is_authenticated: !is_auth_required,
            current_db: 0,
            is_master_link: false,
            listening_port: 0,
        }
    }

    /// The session the slave uses for the replication stream. It is authenticated
    /// implicitly and may write while the server is read-only.
    pub fn master_link(current_db: usize) -> Self {
        Self {
            session_id: 0,
            is_authenticated: true,
            current_db,
            is_master_link: true,
            listening_port: 0,
        }
    }
}

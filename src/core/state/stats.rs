// src/core/state/stats.rs

//! Server-wide statistics reported by `INFO stats`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StatsState {
    /// The total number of connections accepted by the server since startup.
    total_connections: AtomicU64,
    /// The total number of commands processed by the server since startup.
    total_commands: AtomicU64,
    expired_keys: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn increment_total_commands(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_commands(&self) -> u64 {
        self.total_commands.load(Ordering::Relaxed)
    }

    pub fn add_expired_keys(&self, n: u64) {
        self.expired_keys.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get_expired_keys(&self) -> u64 {
        self.expired_keys.load(Ordering::Relaxed)
    }
}

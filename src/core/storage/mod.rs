// src/core/storage/mod.rs

//! In-memory storage: value types, per-database keyspaces, the shared `Store`
//! and the records it publishes on every committed write.

pub mod data_types;
pub mod keyspace;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod ttl;

pub use data_types::{DataValue, StoredValue};
pub use keyspace::Keyspace;
pub use record::{CmdArg, CommandRecord, CommitHook, CommitLog};
pub use snapshot::{Snapshot, SnapshotObject};
pub use store::Store;
pub use ttl::ExpireSweeper;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

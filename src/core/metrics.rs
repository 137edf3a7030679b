// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, IntCounter, IntGauge, TextEncoder, register_counter,
    register_gauge, register_histogram, register_int_counter, register_int_gauge,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("qdb_connected_clients", "Number of currently connected clients.").unwrap();
    /// A boolean gauge indicating if a background RDB dump is in progress.
    pub static ref BGSAVE_IN_PROGRESS: IntGauge =
        register_int_gauge!("qdb_bgsave_in_progress", "RDB dump in progress (1 for true, 0 for false).").unwrap();

    // --- Server-wide Counters ---
    /// The total number of commands processed by the server since startup.
    pub static ref COMMANDS_PROCESSED_TOTAL: Counter =
        register_counter!("qdb_commands_processed_total", "Total number of commands processed.").unwrap();
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("qdb_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of keys removed by the expire sweeper.
    pub static ref EXPIRED_KEYS_TOTAL: IntCounter =
        register_int_counter!("qdb_expired_keys_total", "Total number of keys expired proactively by the sweeper.").unwrap();

    // --- Master Replication ---
    pub static ref MASTER_REPL_OFFSET: IntGauge =
        register_int_gauge!("qdb_master_repl_offset", "Current master replication offset.").unwrap();
    pub static ref CONNECTED_SLAVES: IntGauge =
        register_int_gauge!("qdb_connected_slaves", "Number of slaves registered with this master.").unwrap();
    pub static ref SYNC_FULL_TOTAL: IntCounter =
        register_int_counter!("qdb_sync_full_total", "Full resynchronizations served.").unwrap();
    pub static ref SYNC_PARTIAL_OK_TOTAL: IntCounter =
        register_int_counter!("qdb_sync_partial_ok_total", "Accepted partial resynchronizations.").unwrap();
    pub static ref SYNC_PARTIAL_ERR_TOTAL: IntCounter =
        register_int_counter!("qdb_sync_partial_err_total", "Partial resynchronizations that degraded to full.").unwrap();

    // --- Slave Replication ---
    pub static ref SLAVE_SYNC_OFFSET: IntGauge =
        register_int_gauge!("qdb_slave_sync_offset", "Last replication offset applied by this slave.").unwrap();
    pub static ref SYNC_TOTAL_BYTES: IntGauge =
        register_int_gauge!("qdb_sync_total_bytes", "RDB bytes received during the current full resync.").unwrap();
    pub static ref SYNC_CACHE_BYTES: IntGauge =
        register_int_gauge!("qdb_sync_cache_bytes", "RDB bytes buffered in the sync pipe.").unwrap();

    // --- Histograms ---
    /// A histogram of command execution latencies.
    pub static ref COMMAND_LATENCY_SECONDS: Histogram =
        register_histogram!("qdb_command_latency_seconds", "Latency of command processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

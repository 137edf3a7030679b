// src/core/storage/ttl.rs

//! The active expiration sweeper. Expired keys are already invisible to readers; the
//! sweeper reclaims them and tells slaves about it with a `DEL`, so a slave never
//! expires keys on its own clock.

use super::{CmdArg, unix_millis};
use crate::core::metrics;
use crate::core::state::ServerState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// The interval at which the sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Keys collected from one database per round.
const SWEEP_SAMPLE_SIZE: usize = 64;
/// Upper bound on the time one sweep may spend across all databases.
const SWEEP_TIME_BUDGET: Duration = Duration::from_millis(25);

pub struct ExpireSweeper {
    state: Arc<ServerState>,
}

impl ExpireSweeper {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Runs the sweeper loop until `shutdown_rx` fires.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Expire sweeper started.");
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // A slave receives its deletions from the master.
                    if !self.state.slave.is_following() {
                        self.sweep();
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Expire sweeper shutting down.");
                    return;
                }
            }
        }
    }

    /// One sweep over every database. Returns the number of keys removed.
    pub fn sweep(&self) -> u64 {
        let started = Instant::now();
        let store = &self.state.store;
        let mut total = 0u64;

        for db in 0..store.databases() {
            loop {
                let now = unix_millis();
                let candidates = match store.read(db, |ks| ks.expired_keys(now, SWEEP_SAMPLE_SIZE)) {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!("Expire sweeper could not read db {}: {}", db, e);
                        break;
                    }
                };
                if candidates.is_empty() {
                    break;
                }

                let removed = store.update(db, |ks, log| {
                    let mut removed = 0u64;
                    for key in &candidates {
                        // Re-check under the write lock: the key may have been rewritten.
                        if !ks.contains(key, now) && ks.purge(key) {
                            log.push("DEL", vec![CmdArg::from(key)]);
                            removed += 1;
                        }
                    }
                    Ok(removed)
                });
                match removed {
                    Ok(n) => total += n,
                    Err(e) => {
                        warn!("Expire sweeper failed on db {}: {}", db, e);
                        break;
                    }
                }

                if candidates.len() < SWEEP_SAMPLE_SIZE || started.elapsed() > SWEEP_TIME_BUDGET {
                    break;
                }
            }
        }

        if total > 0 {
            metrics::EXPIRED_KEYS_TOTAL.inc_by(total);
            self.state.stats.add_expired_keys(total);
            debug!("Expire sweeper removed {} keys.", total);
        }
        total
    }
}

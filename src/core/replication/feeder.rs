// src/core/replication/feeder.rs

//! The per-slave feeder: copies backlog bytes to one slave's socket, starting at a
//! given offset, and sleeps on the slave's notification channel when caught up.

use super::master::{ReplicationMaster, SlaveInfo, SlaveSyncState};
use crate::core::QdbError;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Size of the window copied from the backlog per write.
pub const FEED_WINDOW: usize = 1024 * 1024;
/// Deadline for each write to the slave.
pub const FEED_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns the feeder for `slave`, delivering bytes from offset `start`.
pub fn spawn_feeder(
    master: Arc<ReplicationMaster>,
    slave: Arc<SlaveInfo>,
    notify: mpsc::Receiver<()>,
    start: u64,
) {
    tokio::spawn(async move {
        slave.sync_cursor.store(start, Ordering::Relaxed);
        slave.set_state(SlaveSyncState::Online);
        info!(
            "Slave {} is online; streaming from offset {}",
            slave.addr, start
        );
        match run_feeder(&master, &slave, notify, start).await {
            Ok(()) => info!("Feeder for slave {} stopped", slave.addr),
            Err(e) => warn!("Feeder for slave {} terminated: {}", slave.addr, e),
        }
        master.unregister_slave(slave.id);
        let _ = slave.kill.send(());
    });
}

async fn run_feeder(
    master: &ReplicationMaster,
    slave: &SlaveInfo,
    mut notify: mpsc::Receiver<()>,
    mut cursor: u64,
) -> Result<(), QdbError> {
    let mut window = vec![0u8; FEED_WINDOW];
    loop {
        loop {
            let n = master
                .read_window(cursor, &mut window)
                .map_err(|e| QdbError::Replication(e.to_string()))?;
            if n > 0 {
                slave
                    .writer
                    .write_with_timeout(&window[..n], FEED_WRITE_TIMEOUT)
                    .await?;
                cursor += n as u64;
                slave.sync_cursor.store(cursor, Ordering::Relaxed);
            }
            if n < window.len() {
                break;
            }
        }
        if notify.recv().await.is_none() {
            return Ok(());
        }
    }
}

// src/core/replication/sync.rs

//! Serves `SYNC` and `PSYNC` on the master: registers the slave, decides between a
//! partial and a full resynchronization, ships the RDB when needed and hands the
//! slave over to its feeder.

use super::feeder::{FEED_WRITE_TIMEOUT, spawn_feeder};
use super::master::{SlaveInfo, SlaveSyncState};
use crate::core::QdbError;
use crate::core::persistence::rdb_saver::{PSYNC_ACQUIRE_TIMEOUT, acquire_bgsave, dump_snapshot};
use crate::core::state::ServerState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Size of each chunk of the RDB file written to the slave.
const RDB_SEND_CHUNK: usize = 1024 * 1024;

/// A parsed `SYNC` / `PSYNC` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub runid: String,
    pub offset: i64,
    /// Legacy `SYNC`: no `+FULLRESYNC` line precedes the RDB.
    pub legacy: bool,
}

impl SyncRequest {
    pub fn legacy() -> Self {
        Self {
            runid: "?".to_string(),
            offset: -1,
            legacy: true,
        }
    }

    pub fn psync(runid: String, offset: i64) -> Self {
        Self {
            runid,
            offset,
            legacy: false,
        }
    }
}

/// Runs the whole sync handshake for one slave connection. On success the slave is
/// registered and its feeder is running.
pub async fn serve_sync(
    state: &Arc<ServerState>,
    request: SyncRequest,
    slave: Arc<SlaveInfo>,
) -> Result<(), QdbError> {
    let master = state.master.clone();
    let notify = master.register_slave(slave.clone());

    let result = if !request.legacy && master.can_partial_sync(&request.runid, request.offset) {
        info!(
            "Partial resync accepted for slave {} from offset {}",
            slave.addr, request.offset
        );
        master.count_partial_sync();
        let reply = slave
            .writer
            .write_with_timeout(b"+CONTINUE\r\n", FEED_WRITE_TIMEOUT)
            .await;
        match reply {
            Ok(()) => {
                spawn_feeder(master.clone(), slave.clone(), notify, request.offset as u64);
                Ok(())
            }
            Err(e) => Err(e),
        }
    } else {
        info!(
            "Full resync requested by slave {} (runid '{}', offset {})",
            slave.addr, request.runid, request.offset
        );
        master.count_full_sync(request.runid != "?");
        match full_resync(state, &request, &slave).await {
            Ok(offset) => {
                spawn_feeder(master.clone(), slave.clone(), notify, offset);
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = &result {
        warn!("Sync with slave {} failed: {}", slave.addr, e);
        master.unregister_slave(slave.id);
    }
    result
}

/// Takes a snapshot, announces `+FULLRESYNC`, and streams the dump as a bulk blob.
/// Returns the offset the feeder must start from.
async fn full_resync(
    state: &Arc<ServerState>,
    request: &SyncRequest,
    slave: &Arc<SlaveInfo>,
) -> Result<u64, QdbError> {
    let permit = acquire_bgsave(&state.bgsave, PSYNC_ACQUIRE_TIMEOUT).await?;

    let master = state.master.clone();
    let (snapshot, offset) = state.store.new_snapshot(|| master.snapshot_offset());
    let offset = offset.ok_or_else(|| {
        QdbError::Replication("could not create the replication backlog".into())
    })?;

    if !request.legacy {
        let line = format!("+FULLRESYNC {} {}\r\n", master.run_id(), offset);
        slave
            .writer
            .write_with_timeout(line.as_bytes(), FEED_WRITE_TIMEOUT)
            .await?;
    }

    let started = Instant::now();
    let path = PathBuf::from(format!(
        "{}.repl-{}.tmp",
        state.config.dump_filepath, slave.id
    ));
    let dumped = dump_snapshot(snapshot, path.clone()).await;
    drop(permit);
    let size = dumped?;

    slave.set_state(SlaveSyncState::SendBulk);
    let sent = send_rdb_file(slave, &path, size).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!("Failed to remove sync dump '{}': {}", path.display(), e);
    }
    sent?;

    info!(
        "Sent {} bytes of RDB to slave {} in {:?}",
        size,
        slave.addr,
        started.elapsed()
    );
    Ok(offset)
}

async fn send_rdb_file(slave: &SlaveInfo, path: &PathBuf, size: u64) -> Result<(), QdbError> {
    let header = format!("${size}\r\n");
    slave
        .writer
        .write_with_timeout(header.as_bytes(), FEED_WRITE_TIMEOUT)
        .await?;

    let mut file = File::open(path).await?;
    let mut chunk = vec![0u8; RDB_SEND_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            return Err(QdbError::Replication(
                "dump file shorter than announced".into(),
            ));
        }
        slave
            .writer
            .write_with_timeout(&chunk[..n], FEED_WRITE_TIMEOUT)
            .await?;
        remaining = remaining.saturating_sub(n as u64);
    }

    slave
        .writer
        .write_with_timeout(b"\r\n", FEED_WRITE_TIMEOUT)
        .await
}

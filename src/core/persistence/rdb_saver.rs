// src/core/persistence/rdb_saver.rs

//! The snapshot-to-RDB pipeline shared by `BGSAVE`, `BGSAVETO`, `SHUTDOWN SAVE` and
//! the master's full-resync path.

use super::rdb::{RDB_BATCH_SIZE, RdbEncoder};
use crate::core::QdbError;
use crate::core::metrics;
use crate::core::storage::{Snapshot, Store};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// Time slice granted to each `load_obj_cron` call.
const SNAPSHOT_CRON_TICK: Duration = Duration::from_millis(100);

/// How long `BGSAVE` waits for another dump to finish.
pub const BGSAVE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long a full resync waits for another dump to finish.
pub const PSYNC_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Holds the process-wide bgsave slot; dropping it lets the next dump start.
pub struct BgsavePermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for BgsavePermit {
    fn drop(&mut self) {
        metrics::BGSAVE_IN_PROGRESS.set(0);
    }
}

/// Acquires the process-wide bgsave permit, failing with `BgsaveTimeout` after `wait`.
pub async fn acquire_bgsave(
    semaphore: &Arc<Semaphore>,
    wait: Duration,
) -> Result<BgsavePermit, QdbError> {
    match tokio::time::timeout(wait, semaphore.clone().acquire_owned()).await {
        Ok(Ok(permit)) => {
            metrics::BGSAVE_IN_PROGRESS.set(1);
            Ok(BgsavePermit { _permit: permit })
        }
        Ok(Err(_)) => Err(QdbError::InvalidState("bgsave is shutting down".into())),
        Err(_) => Err(QdbError::BgsaveTimeout),
    }
}

/// Number of encoding threads used per snapshot slice.
pub fn encoder_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Drains `snapshot` into `encoder` slice by slice.
fn encode_snapshot<W: std::io::Write>(
    snapshot: &mut Snapshot,
    encoder: &mut RdbEncoder<W>,
) -> std::io::Result<()> {
    let parallelism = encoder_parallelism();
    loop {
        let (objects, more) =
            snapshot.load_obj_cron(SNAPSHOT_CRON_TICK, parallelism, RDB_BATCH_SIZE);
        encoder.write_objects(&objects)?;
        if !more {
            return Ok(());
        }
    }
}

/// Writes `snapshot` to `path` through a temp file that is flushed, synced, then
/// renamed into place. Returns the size of the dump.
pub async fn dump_snapshot(mut snapshot: Snapshot, path: PathBuf) -> Result<u64, QdbError> {
    let started = Instant::now();
    let total = snapshot.total();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let temp_path = temp_path_for(&path);
        let mut write = || -> std::io::Result<u64> {
            let file = File::create(&temp_path)?;
            let mut encoder = RdbEncoder::new(BufWriter::new(file))?;
            encode_snapshot(&mut snapshot, &mut encoder)?;
            let (writer, size) = encoder.finish()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(size)
        };
        match write() {
            Ok(size) => {
                fs::rename(&temp_path, &path)?;
                Ok(size)
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&temp_path) {
                    debug!(
                        "Failed to remove temporary dump '{}': {remove_err}",
                        temp_path.display()
                    );
                }
                Err(e)
            }
        }
    })
    .await??;
    info!(
        "RDB dump of {} keys ({} bytes) written in {:?}",
        total,
        result,
        started.elapsed()
    );
    Ok(result)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".tmp.{}", std::process::id()));
    PathBuf::from(name)
}

/// Takes a snapshot of `store` and dumps it to `path`. The caller holds the bgsave permit.
pub async fn save_store(store: &Store, path: &str) -> Result<u64, QdbError> {
    let (snapshot, ()) = store.new_snapshot(|| ());
    dump_snapshot(snapshot, PathBuf::from(path)).await
}

/// Runs a dump in the background, releasing the permit when it completes.
pub fn spawn_bgsave(store: Arc<Store>, path: String, permit: BgsavePermit) {
    let (snapshot, ()) = store.new_snapshot(|| ());
    tokio::spawn(async move {
        info!("Background saving started to {}", path);
        match dump_snapshot(snapshot, PathBuf::from(&path)).await {
            Ok(_) => info!("Background saving terminated with success"),
            Err(e) => error!("Background saving to {} failed: {}", path, e),
        }
        drop(permit);
    });
}

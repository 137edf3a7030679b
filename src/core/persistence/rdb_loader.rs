// src/core/persistence/rdb_loader.rs

//! Loads an RDB stream into the store with several concurrent workers.
//!
//! A single decoder is shared behind a mutex so entries are pulled in file order,
//! while the workers apply them to the store in parallel.

use super::rdb::RdbDecoder;
use crate::core::QdbError;
use crate::core::storage::{Store, unix_millis};
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Wraps a reader and counts the bytes that pass through it.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A shared handle to the running byte count.
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.count.clone()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = buf.filled().len() - before;
            self.count.fetch_add(read as u64, Ordering::Relaxed);
        }
        poll
    }
}

/// Number of concurrent restore workers.
pub fn loader_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(2)
}

/// Decodes `reader` and restores every entry into `store` using `workers` tasks.
/// Returns the number of keys restored. The first decode or restore error aborts
/// the load.
pub async fn load_parallel<R>(store: Arc<Store>, reader: R, workers: usize) -> Result<u64, QdbError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let decoder = Arc::new(Mutex::new(RdbDecoder::new(reader, store.databases())));
    let loaded = Arc::new(AtomicU64::new(0));
    let mut set = JoinSet::new();

    for _ in 0..workers.max(1) {
        let decoder = decoder.clone();
        let store = store.clone();
        let loaded = loaded.clone();
        set.spawn(async move {
            loop {
                let entry = { decoder.lock().await.next_entry().await? };
                let Some(entry) = entry else {
                    return Ok::<(), QdbError>(());
                };
                let ttl_ms = entry
                    .expire_at
                    .map(|at| at.saturating_sub(unix_millis()).max(1));
                store.restore(entry.db as usize, entry.key, entry.value, ttl_ms)?;
                loaded.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        let result = joined.map_err(QdbError::from).and_then(|r| r);
        if let Err(e) = result {
            set.abort_all();
            return Err(e);
        }
    }

    if !decoder.lock().await.is_finished() {
        return Err(QdbError::Rdb("stream ended before the footer".into()));
    }
    Ok(loaded.load(Ordering::Relaxed))
}

/// Loads the dump at `path` if it exists. Returns `None` when there is nothing to load.
pub async fn load_dump_file(store: Arc<Store>, path: &str) -> Result<Option<u64>, QdbError> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Dump file not found at {}. Starting with an empty database.", path);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    if len == 0 {
        info!("Dump file at {} is empty. Starting fresh.", path);
        return Ok(None);
    }

    let started = Instant::now();
    debug!("Loading {} bytes of RDB from {}", len, path);
    let keys = load_parallel(store, BufReader::new(file), loader_parallelism()).await?;
    info!(
        "DB loaded from disk: {} keys in {:?}",
        keys,
        started.elapsed()
    );
    Ok(Some(keys))
}

// src/core/replication/master.rs

//! The master side of replication: the backlog, the replication offset and the set of
//! registered slaves, all guarded by one readers-writer lock.
//!
//! Offsets map onto the backlog as follows. `master_offset` is the offset of the last
//! byte appended. The backlog holds `len` bytes, so its oldest byte sits at
//! `first_byte = master_offset - len + 1`. A slave that asks for offset `o` needs the
//! bytes from `o` onwards, which is possible exactly when `o` lies in
//! `[first_byte, first_byte + len]`.

use super::backlog::Backlog;
use super::fanout::{encode_command, encode_select};
use crate::config::Config;
use crate::connection::ConnWriter;
use crate::core::metrics;
use crate::core::storage::{CmdArg, unix_millis};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strum_macros::{AsRefStr, Display};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Sentinel for "no database selected yet"; the next command always emits `SELECT`.
pub const NO_DB: u32 = u32::MAX;

/// The replication knobs the master engine reads from the server configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub backlog_size: u64,
    pub backlog_file_path: String,
    pub ping_period: Duration,
    /// `None` means the backlog is never released.
    pub backlog_ttl: Option<Duration>,
}

impl From<&Config> for MasterConfig {
    fn from(config: &Config) -> Self {
        Self {
            backlog_size: config.repl_backlog_size,
            backlog_file_path: config.repl_backlog_file_path.clone(),
            ping_period: Duration::from_secs(config.repl_ping_slave_period),
            backlog_ttl: (config.repl_backlog_ttl > 0)
                .then(|| Duration::from_secs(config.repl_backlog_ttl)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SlaveSyncState {
    WaitBgsave,
    SendBulk,
    Online,
}

/// A slave as seen by the master.
#[derive(Debug)]
pub struct SlaveInfo {
    pub id: u64,
    pub addr: SocketAddr,
    pub listening_port: u16,
    pub writer: ConnWriter,
    /// Fired to close the slave's connection.
    pub kill: broadcast::Sender<()>,
    /// Next replication offset the feeder will deliver.
    pub sync_cursor: AtomicU64,
    pub ack_offset: AtomicU64,
    /// Unix seconds of the last ACK.
    pub ack_time: AtomicU64,
    state: parking_lot::Mutex<SlaveSyncState>,
}

impl SlaveInfo {
    pub fn new(
        id: u64,
        addr: SocketAddr,
        listening_port: u16,
        writer: ConnWriter,
        kill: broadcast::Sender<()>,
    ) -> Self {
        Self {
            id,
            addr,
            listening_port,
            writer,
            kill,
            sync_cursor: AtomicU64::new(0),
            ack_offset: AtomicU64::new(0),
            ack_time: AtomicU64::new(unix_millis() / 1000),
            state: parking_lot::Mutex::new(SlaveSyncState::WaitBgsave),
        }
    }

    pub fn state(&self) -> SlaveSyncState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SlaveSyncState) {
        *self.state.lock() = state;
    }

    /// The address other tools should use to reach this slave.
    pub fn announced_addr(&self) -> (String, u16) {
        let port = if self.listening_port > 0 {
            self.listening_port
        } else {
            self.addr.port()
        };
        (self.addr.ip().to_string(), port)
    }
}

struct SlaveEntry {
    info: Arc<SlaveInfo>,
    notify: mpsc::Sender<()>,
}

struct MasterState {
    backlog: Option<Backlog>,
    slaves: HashMap<u64, SlaveEntry>,
    master_offset: u64,
    last_selected_db: u32,
    last_slave_seen: Instant,
}

impl MasterState {
    fn backlog_len(&self) -> u64 {
        self.backlog.as_ref().map_or(0, Backlog::len)
    }

    fn first_byte(&self) -> u64 {
        self.master_offset + 1 - self.backlog_len()
    }
}

/// Why a feeder cannot read from the backlog any more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    NoBacklog,
    /// The cursor fell outside `[first_byte, first_byte + len]`.
    OutOfRange { cursor: u64, first_byte: u64, len: u64 },
    Io(String),
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowError::NoBacklog => write!(f, "backlog released"),
            WindowError::OutOfRange {
                cursor,
                first_byte,
                len,
            } => write!(
                f,
                "offset {cursor} outside backlog window [{first_byte}, {}]",
                first_byte + len
            ),
            WindowError::Io(e) => write!(f, "backlog read failed: {e}"),
        }
    }
}

/// A point-in-time view of the master state, used by `INFO` and `ROLE`.
#[derive(Debug, Clone)]
pub struct MasterReport {
    pub master_offset: u64,
    pub backlog_active: bool,
    pub backlog_size: u64,
    pub first_byte: u64,
    pub histlen: u64,
    pub slaves: Vec<Arc<SlaveInfo>>,
}

pub struct ReplicationMaster {
    run_id: String,
    config: MasterConfig,
    inner: RwLock<MasterState>,
    sync_full: AtomicU64,
    sync_partial_ok: AtomicU64,
    sync_partial_err: AtomicU64,
}

impl ReplicationMaster {
    pub fn new(run_id: String, config: MasterConfig) -> Self {
        Self {
            run_id,
            config,
            inner: RwLock::new(MasterState {
                backlog: None,
                slaves: HashMap::new(),
                master_offset: 0,
                last_selected_db: NO_DB,
                last_slave_seen: Instant::now(),
            }),
            sync_full: AtomicU64::new(0),
            sync_partial_ok: AtomicU64::new(0),
            sync_partial_err: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn master_offset(&self) -> u64 {
        self.inner.read().master_offset
    }

    pub fn last_selected_db(&self) -> u32 {
        self.inner.read().last_selected_db
    }

    pub fn has_backlog(&self) -> bool {
        self.inner.read().backlog.is_some()
    }

    pub fn sync_full(&self) -> u64 {
        self.sync_full.load(Ordering::Relaxed)
    }

    pub fn sync_partial_ok(&self) -> u64 {
        self.sync_partial_ok.load(Ordering::Relaxed)
    }

    pub fn sync_partial_err(&self) -> u64 {
        self.sync_partial_err.load(Ordering::Relaxed)
    }

    pub(crate) fn count_full_sync(&self, runid_supplied: bool) {
        self.sync_full.fetch_add(1, Ordering::Relaxed);
        metrics::SYNC_FULL_TOTAL.inc();
        if runid_supplied {
            self.sync_partial_err.fetch_add(1, Ordering::Relaxed);
            metrics::SYNC_PARTIAL_ERR_TOTAL.inc();
        }
    }

    pub(crate) fn count_partial_sync(&self) {
        self.sync_partial_ok.fetch_add(1, Ordering::Relaxed);
        metrics::SYNC_PARTIAL_OK_TOTAL.inc();
    }

    fn create_backlog(&self) -> std::io::Result<Backlog> {
        if self.config.backlog_file_path.is_empty() {
            Ok(Backlog::in_memory(self.config.backlog_size as usize))
        } else {
            Backlog::with_file(&self.config.backlog_file_path, self.config.backlog_size)
        }
    }

    /// Creates the backlog if it is missing. The offset is bumped past every position a
    /// slave could have seen before the backlog existed.
    fn ensure_backlog(&self, st: &mut MasterState) -> bool {
        if st.backlog.is_some() {
            return true;
        }
        match self.create_backlog() {
            Ok(backlog) => {
                st.backlog = Some(backlog);
                st.master_offset += 1;
                metrics::MASTER_REPL_OFFSET.set(st.master_offset as i64);
                info!(
                    "Replication backlog created ({} bytes), first byte offset {}",
                    self.config.backlog_size,
                    st.first_byte()
                );
                true
            }
            Err(e) => {
                error!("Failed to create replication backlog: {}", e);
                false
            }
        }
    }

    fn destroy_backlog(st: &mut MasterState) {
        if let Some(mut backlog) = st.backlog.take() {
            if let Err(e) = backlog.close() {
                warn!("Error closing replication backlog: {}", e);
            }
            info!("Replication backlog destroyed");
        }
    }

    /// Appends one command to the replication stream and wakes every feeder.
    pub fn feed(&self, db: u32, op: &str, args: &[CmdArg]) {
        let mut st = self.inner.write();
        if st.backlog.is_none() && st.slaves.is_empty() {
            return;
        }
        if !self.ensure_backlog(&mut st) {
            return;
        }

        let mut buf = Vec::with_capacity(64);
        if db != NO_DB && db != st.last_selected_db {
            encode_select(&mut buf, db);
            st.last_selected_db = db;
        }
        encode_command(&mut buf, op, args);

        let written = match st.backlog.as_mut().map(|b| b.write(&buf)) {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                error!("Replication backlog write failed: {}. Destroying backlog.", e);
                Self::destroy_backlog(&mut st);
                return;
            }
            None => return,
        };
        st.master_offset += written as u64;
        metrics::MASTER_REPL_OFFSET.set(st.master_offset as i64);

        for entry in st.slaves.values() {
            let _ = entry.notify.try_send(());
        }
    }

    /// Called from inside the store's snapshot pause. Returns the offset of the first
    /// byte the slave must receive after the dump.
    pub fn snapshot_offset(&self) -> Option<u64> {
        let mut st = self.inner.write();
        if !self.ensure_backlog(&mut st) {
            return None;
        }
        st.last_selected_db = NO_DB;
        Some(st.master_offset + 1)
    }

    /// Whether a `PSYNC <runid> <offset>` can be served from the backlog.
    pub fn can_partial_sync(&self, runid: &str, offset: i64) -> bool {
        if runid != self.run_id || offset < 0 {
            return false;
        }
        let st = self.inner.read();
        if st.backlog.is_none() {
            return false;
        }
        let offset = offset as u64;
        let first = st.first_byte();
        offset >= first && offset <= first + st.backlog_len()
    }

    /// Copies backlog bytes starting at replication offset `cursor` into `buf`.
    pub fn read_window(&self, cursor: u64, buf: &mut [u8]) -> Result<usize, WindowError> {
        let st = self.inner.read();
        let backlog = st.backlog.as_ref().ok_or(WindowError::NoBacklog)?;
        let first_byte = st.first_byte();
        let len = backlog.len();
        if cursor < first_byte || cursor > first_byte + len {
            return Err(WindowError::OutOfRange {
                cursor,
                first_byte,
                len,
            });
        }
        backlog
            .read_at(buf, cursor - first_byte)
            .map_err(|e| WindowError::Io(e.to_string()))
    }

    /// Registers a slave and returns the receiving end of its notification channel.
    pub fn register_slave(&self, info: Arc<SlaveInfo>) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut st = self.inner.write();
        info!("Slave {} registered (id {})", info.addr, info.id);
        st.slaves.insert(info.id, SlaveEntry { info, notify: tx });
        st.last_slave_seen = Instant::now();
        metrics::CONNECTED_SLAVES.set(st.slaves.len() as i64);
        rx
    }

    pub fn unregister_slave(&self, id: u64) {
        let mut st = self.inner.write();
        if let Some(entry) = st.slaves.remove(&id) {
            info!("Slave {} unregistered (id {})", entry.info.addr, id);
        }
        st.last_slave_seen = Instant::now();
        metrics::CONNECTED_SLAVES.set(st.slaves.len() as i64);
    }

    pub fn slave(&self, id: u64) -> Option<Arc<SlaveInfo>> {
        self.inner.read().slaves.get(&id).map(|e| e.info.clone())
    }

    pub fn slave_count(&self) -> usize {
        self.inner.read().slaves.len()
    }

    /// Records a `REPLCONF ACK` from slave `id`.
    pub fn ack(&self, id: u64, offset: u64) {
        if let Some(slave) = self.slave(id) {
            slave.ack_offset.store(offset, Ordering::Relaxed);
            slave
                .ack_time
                .store(unix_millis() / 1000, Ordering::Relaxed);
            debug!("Slave {} acknowledged offset {}", slave.addr, offset);
        }
    }

    /// One heartbeat: a `PING` through the normal feed path, then the backlog TTL check.
    pub fn heartbeat(&self) {
        let db = self.last_selected_db();
        self.feed(db, "PING", &[]);
        self.release_idle_backlog();
    }

    fn release_idle_backlog(&self) {
        let Some(ttl) = self.config.backlog_ttl else {
            return;
        };
        let mut st = self.inner.write();
        if !st.slaves.is_empty() {
            st.last_slave_seen = Instant::now();
            return;
        }
        if st.backlog.is_some() && st.last_slave_seen.elapsed() > ttl {
            info!(
                "No slaves for {:?}; releasing the replication backlog.",
                ttl
            );
            Self::destroy_backlog(&mut st);
        }
    }

    pub fn report(&self) -> MasterReport {
        let st = self.inner.read();
        let mut slaves: Vec<_> = st.slaves.values().map(|e| e.info.clone()).collect();
        slaves.sort_by_key(|s| s.id);
        MasterReport {
            master_offset: st.master_offset,
            backlog_active: st.backlog.is_some(),
            backlog_size: st
                .backlog
                .as_ref()
                .map_or(self.config.backlog_size, Backlog::capacity),
            first_byte: if st.backlog.is_some() {
                st.first_byte()
            } else {
                0
            },
            histlen: st.backlog_len(),
            slaves,
        }
    }

    /// Runs the heartbeat ticker until `shutdown_rx` fires.
    pub async fn run_heartbeat(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.ping_period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.heartbeat(),
                _ = shutdown_rx.recv() => {
                    debug!("Replication heartbeat stopped.");
                    return;
                }
            }
        }
    }

    /// Drops every slave (ending their feeders and connections) and the backlog.
    pub fn close(&self) {
        let mut st = self.inner.write();
        for (_, entry) in st.slaves.drain() {
            let _ = entry.info.kill.send(());
        }
        metrics::CONNECTED_SLAVES.set(0);
        Self::destroy_backlog(&mut st);
    }
}

/// Generates a 40-character lowercase hex run id from the OS random source.
pub fn generate_run_id() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 20];
    getrandom::fill(&mut bytes)?;
    Ok(hex::encode(bytes))
}

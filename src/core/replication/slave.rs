// src/core/replication/slave.rs

//! Implements the replication logic for a slave server.
//!
//! `SLAVEOF` performs the handshake (AUTH, PING, REPLCONF listening-port) on the
//! calling connection and hands the established link to a daemon task. The daemon owns
//! the link task, which negotiates `PSYNC`, receives the RDB through a buffered pipe
//! while the parallel loader drains it, and then applies the command stream while
//! acknowledging the applied offset back to the master. A broken link is re-dialed
//! after one second.

use super::pipe::{PipeWriter, pipe};
use crate::connection::{ConnWriter, SessionState};
use crate::core::QdbError;
use crate::core::handler::command_router::Router;
use crate::core::metrics;
use crate::core::persistence::rdb_loader::{CountingReader, load_parallel, loader_parallelism};
use crate::core::protocol::{ReplStreamCodec, RespFrame};
use crate::core::state::ServerState;
use crate::core::storage::unix_millis;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strum_macros::{AsRefStr, Display};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

/// Deadline for connecting and for every handshake round trip.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Read deadline while waiting for the `PSYNC` reply and the RDB payload.
pub const RDB_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Delay before re-dialing a master after the link broke.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Minimum spacing between two `REPLCONF ACK`s.
pub const ACK_INTERVAL: Duration = Duration::from_secs(1);

const RDB_READ_CHUNK: usize = 8 * 1024;
const PIPE_GAUGE_PERIOD: Duration = Duration::from_millis(200);

/// State of the link to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    /// Not following anyone.
    None,
    /// Following a master, waiting to (re)connect.
    Connect,
    Connecting,
    /// Receiving the RDB of a full resync.
    Sync,
    /// Applying the command stream.
    Connected,
}

#[derive(Debug)]
struct SlaveState {
    master_addr: Option<String>,
    master_runid: String,
    /// Offset of the last byte applied, `-1` when unknown.
    sync_offset: i64,
    sync_db: usize,
    /// Unix ms at which the current full resync started.
    syncing_since: u64,
    link: LinkState,
}

impl SlaveState {
    fn reset(&mut self) {
        self.master_addr = None;
        self.master_runid = "?".to_string();
        self.sync_offset = -1;
        self.sync_db = 0;
        self.syncing_since = 0;
        self.link = LinkState::None;
    }
}

/// A point-in-time view of the slave state, used by `INFO` and `ROLE`.
#[derive(Debug, Clone)]
pub struct SlaveReport {
    pub master_addr: Option<String>,
    pub master_runid: String,
    pub sync_offset: i64,
    pub link: LinkState,
    pub syncing_since: u64,
    pub sync_total_bytes: u64,
    pub sync_cache_bytes: u64,
}

impl SlaveReport {
    /// Splits `master_addr` into host and port.
    pub fn master_host_port(&self) -> Option<(String, u16)> {
        let addr = self.master_addr.as_ref()?;
        let (host, port) = addr.rsplit_once(':')?;
        Some((host.to_string(), port.parse().ok()?))
    }

    pub fn link_up(&self) -> bool {
        self.link == LinkState::Connected
    }
}

/// A request for the daemon. `None` stops following.
pub struct FollowRequest {
    target: Option<(String, MasterLink)>,
    done: oneshot::Sender<()>,
}

pub struct ReplicationSlave {
    inner: parking_lot::Mutex<SlaveState>,
    /// Serializes `SLAVEOF` calls; only one follow operation is pending at a time.
    follow_lock: tokio::sync::Mutex<()>,
    control: mpsc::Sender<FollowRequest>,
    sync_total_bytes: AtomicU64,
    sync_cache_bytes: AtomicU64,
}

impl ReplicationSlave {
    /// Creates the slave engine and the receiving end of its control channel, which is
    /// consumed by `run_daemon`.
    pub fn new() -> (Self, mpsc::Receiver<FollowRequest>) {
        let (control, control_rx) = mpsc::channel(1);
        let mut state = SlaveState {
            master_addr: None,
            master_runid: String::new(),
            sync_offset: -1,
            sync_db: 0,
            syncing_since: 0,
            link: LinkState::None,
        };
        state.reset();
        let slave = Self {
            inner: parking_lot::Mutex::new(state),
            follow_lock: tokio::sync::Mutex::new(()),
            control,
            sync_total_bytes: AtomicU64::new(0),
            sync_cache_bytes: AtomicU64::new(0),
        };
        (slave, control_rx)
    }

    /// True while this server follows a master; ordinary clients may not write.
    pub fn is_following(&self) -> bool {
        self.inner.lock().master_addr.is_some()
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.lock().link
    }

    pub fn sync_offset(&self) -> i64 {
        self.inner.lock().sync_offset
    }

    pub fn master_runid(&self) -> String {
        self.inner.lock().master_runid.clone()
    }

    pub fn report(&self) -> SlaveReport {
        let st = self.inner.lock();
        SlaveReport {
            master_addr: st.master_addr.clone(),
            master_runid: st.master_runid.clone(),
            sync_offset: st.sync_offset,
            link: st.link,
            syncing_since: st.syncing_since,
            sync_total_bytes: self.sync_total_bytes.load(Ordering::Relaxed),
            sync_cache_bytes: self.sync_cache_bytes.load(Ordering::Relaxed),
        }
    }

    /// `SLAVEOF host port` when `target` is set, `SLAVEOF NO ONE` otherwise. Returns once
    /// the daemon has switched to the new role.
    pub async fn slave_of(
        &self,
        target: Option<(String, u16)>,
        own_port: u16,
        master_auth: &str,
    ) -> Result<(), QdbError> {
        let _pending = self.follow_lock.lock().await;
        let target = match target {
            Some((host, port)) => {
                let addr = format!("{host}:{port}");
                info!("SLAVEOF {}: starting handshake", addr);
                let link = MasterLink::connect(&addr, master_auth, own_port).await?;
                Some((addr, link))
            }
            None => None,
        };

        let (done, done_rx) = oneshot::channel();
        self.control
            .send(FollowRequest { target, done })
            .await
            .map_err(|_| QdbError::InvalidState("replication daemon is not running".into()))?;
        done_rx
            .await
            .map_err(|_| QdbError::InvalidState("replication daemon stopped".into()))
    }

    fn start_following(&self, addr: &str) {
        let mut st = self.inner.lock();
        if st.master_addr.as_deref() != Some(addr) {
            st.reset();
        }
        st.master_addr = Some(addr.to_string());
        st.link = LinkState::Connecting;
    }

    fn stop_following(&self) {
        self.inner.lock().reset();
        self.sync_cache_bytes.store(0, Ordering::Relaxed);
        metrics::SLAVE_SYNC_OFFSET.set(-1);
        metrics::SYNC_CACHE_BYTES.set(0);
    }

    fn set_link_state(&self, link: LinkState) {
        self.inner.lock().link = link;
    }

    /// The `PSYNC` arguments: the cached master and the next offset wanted, or `? -1`.
    fn psync_args(&self) -> (String, i64) {
        let st = self.inner.lock();
        if st.master_runid != "?" && st.sync_offset >= 0 {
            (st.master_runid.clone(), st.sync_offset + 1)
        } else {
            ("?".to_string(), -1)
        }
    }

    /// Enters the `Sync` state. The cached master is forgotten until the dump has fully
    /// loaded, so a transfer that breaks half way is retried as a full resync.
    fn begin_full_sync(&self) {
        let mut st = self.inner.lock();
        st.master_runid = "?".to_string();
        st.sync_offset = -1;
        st.sync_db = 0;
        st.syncing_since = unix_millis();
        st.link = LinkState::Sync;
        self.sync_total_bytes.store(0, Ordering::Relaxed);
        metrics::SYNC_TOTAL_BYTES.set(0);
        metrics::SLAVE_SYNC_OFFSET.set(-1);
    }

    /// Records the master the loaded dump came from. `offset` is the offset of the
    /// first byte that follows the dump.
    fn finish_full_sync(&self, runid: String, offset: Option<i64>) {
        let mut st = self.inner.lock();
        st.master_runid = runid;
        st.sync_offset = offset.map_or(-1, |o| o - 1);
        metrics::SLAVE_SYNC_OFFSET.set(st.sync_offset);
    }

    fn add_total_bytes(&self, n: usize) {
        let total = self.sync_total_bytes.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
        metrics::SYNC_TOTAL_BYTES.set(total as i64);
    }

    fn set_cache_bytes(&self, n: u64) {
        self.sync_cache_bytes.store(n, Ordering::Relaxed);
        metrics::SYNC_CACHE_BYTES.set(n as i64);
    }

    /// Accounts one applied frame of `consumed` bytes; `db` is the database selected
    /// after it.
    fn advance(&self, consumed: usize, db: usize) {
        let mut st = self.inner.lock();
        st.sync_db = db;
        if st.sync_offset >= 0 {
            st.sync_offset += consumed as i64;
            metrics::SLAVE_SYNC_OFFSET.set(st.sync_offset);
        }
    }

    fn sync_db(&self) -> usize {
        self.inner.lock().sync_db
    }

    /// The offset to acknowledge, `None` when it is unknown.
    fn ack_offset(&self) -> Option<i64> {
        let offset = self.inner.lock().sync_offset;
        (offset >= 0).then_some(offset)
    }
}

/// A handshaken connection to a master.
pub struct MasterLink {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MasterLink {
    /// Connects to `addr` and runs the handshake.
    async fn connect(addr: &str, master_auth: &str, own_port: u16) -> Result<Self, QdbError> {
        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr))
            .await?
            .map_err(|e| QdbError::Replication(format!("failed to connect to {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut link = Self {
            reader: BufReader::new(reader),
            writer,
        };

        if !master_auth.is_empty() {
            link.send(&["AUTH", master_auth]).await?;
            link.expect_status("OK").await?;
            info!("Handshake step (AUTH) with {} successful.", addr);
        }

        link.send(&["PING"]).await?;
        link.expect_status("PONG").await?;
        info!("Handshake step (PING) with {} successful.", addr);

        let port = own_port.to_string();
        link.send(&["REPLCONF", "listening-port", &port]).await?;
        link.expect_status("OK").await?;
        info!("Handshake step (REPLCONF listening-port) with {} successful.", addr);
        Ok(link)
    }

    async fn send(&mut self, parts: &[&str]) -> Result<(), QdbError> {
        let frame = RespFrame::command(parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())));
        let encoded = frame.encode_to_vec()?;
        tokio::time::timeout(HANDSHAKE_TIMEOUT, self.writer.write_all(&encoded)).await??;
        Ok(())
    }

    /// Reads one reply line without its terminator, skipping empty keep-alive lines.
    async fn read_line(&mut self, deadline: Duration) -> Result<String, QdbError> {
        loop {
            let mut line = Vec::new();
            let n = tokio::time::timeout(deadline, self.reader.read_until(b'\n', &mut line)).await??;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "master closed the connection",
                )
                .into());
            }
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if !line.is_empty() {
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
        }
    }

    async fn expect_status(&mut self, expected: &str) -> Result<(), QdbError> {
        let line = self.read_line(HANDSHAKE_TIMEOUT).await?;
        if line.strip_prefix('+') == Some(expected) {
            Ok(())
        } else {
            Err(QdbError::Replication(format!(
                "expected '+{expected}' from master, got '{line}'"
            )))
        }
    }
}

/// The slave daemon: applies role changes requested through `SLAVEOF` and owns the
/// task driving the current master link.
pub async fn run_daemon(
    state: Arc<ServerState>,
    mut control_rx: mpsc::Receiver<FollowRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut link_task: Option<JoinHandle<()>> = None;
    loop {
        tokio::select! {
            request = control_rx.recv() => {
                let Some(request) = request else { break };
                if let Some(task) = link_task.take() {
                    task.abort();
                }
                match request.target {
                    Some((addr, link)) => {
                        info!("Following master {}", addr);
                        state.slave.start_following(&addr);
                        link_task = Some(tokio::spawn(run_link(state.clone(), addr, link)));
                    }
                    None => {
                        if state.slave.is_following() {
                            info!("Stopped following the master; acting as a master now.");
                        }
                        state.slave.stop_following();
                    }
                }
                let _ = request.done.send(());
            }
            _ = shutdown_rx.recv() => {
                debug!("Replication slave daemon shutting down.");
                break;
            }
        }
    }
    if let Some(task) = link_task {
        task.abort();
    }
}

/// Drives one master link for as long as this server follows `addr`, re-dialing after
/// every failure.
async fn run_link(state: Arc<ServerState>, addr: String, first: MasterLink) {
    let slave = state.slave.clone();
    let mut next = Some(first);
    loop {
        let link = match next.take() {
            Some(link) => link,
            None => {
                slave.set_link_state(LinkState::Connecting);
                let connected = MasterLink::connect(
                    &addr,
                    &state.config.master_auth,
                    state.config.port(),
                )
                .await;
                match connected {
                    Ok(link) => link,
                    Err(e) => {
                        warn!("Reconnecting to master {} failed: {}", addr, e);
                        slave.set_link_state(LinkState::Connect);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }
        };

        match run_session(&state, link).await {
            Ok(()) => info!("Master {} closed the replication link.", addr),
            Err(e) => warn!("Replication link to {} broken: {}", addr, e),
        }
        slave.set_link_state(LinkState::Connect);
        info!("Will reconnect to master {} in {:?}", addr, RECONNECT_DELAY);
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Negotiates the resync, loads the RDB when one is sent, then applies the stream.
async fn run_session(state: &Arc<ServerState>, mut link: MasterLink) -> Result<(), QdbError> {
    let slave = &state.slave;
    let (runid, offset) = slave.psync_args();
    info!("Sending PSYNC {} {}", runid, offset);
    link.send(&["PSYNC", &runid, &offset.to_string()]).await?;

    let reply = link.read_line(RDB_READ_TIMEOUT).await?;
    let full_sync = if reply == "+CONTINUE" || reply.starts_with("+CONTINUE ") {
        info!("Partial resync accepted; continuing from offset {}", offset);
        slave.set_link_state(LinkState::Connected);
        None
    } else if let Some(rest) = reply.strip_prefix("+FULLRESYNC ") {
        let (runid, offset) = parse_fullresync(rest)?;
        info!("Full resync from master {} at offset {}", runid, offset);
        Some((runid, Some(offset)))
    } else {
        warn!("Master replied '{}' to PSYNC; falling back to SYNC", reply);
        link.send(&["SYNC"]).await?;
        Some(("?".to_string(), None))
    };

    if let Some((runid, offset)) = full_sync {
        slave.begin_full_sync();
        receive_rdb(state, &mut link).await?;
        slave.finish_full_sync(runid, offset);
    }
    stream_commands(state, link).await
}

fn parse_fullresync(rest: &str) -> Result<(String, i64), QdbError> {
    let mut parts = rest.split_whitespace();
    let runid = parts.next();
    let offset = parts.next().and_then(|o| o.parse::<i64>().ok());
    match (runid, offset) {
        (Some(runid), Some(offset)) if offset > 0 => Ok((runid.to_string(), offset)),
        _ => Err(QdbError::Replication(format!(
            "malformed FULLRESYNC reply '{rest}'"
        ))),
    }
}

/// Receives `$<size>\r\n<payload>\r\n` and loads the payload into the cleared store.
async fn receive_rdb(state: &Arc<ServerState>, link: &mut MasterLink) -> Result<(), QdbError> {
    let header = link.read_line(RDB_READ_TIMEOUT).await?;
    let size: u64 = header
        .strip_prefix('$')
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| QdbError::Replication(format!("bad RDB size line '{header}'")))?;
    info!("MASTER <-> SLAVE sync: receiving {} bytes of RDB", size);

    state.store.flush_all(false);

    let config = &state.config;
    let overflow = (!config.sync_file_path.is_empty())
        .then(|| (Path::new(&config.sync_file_path), config.sync_file_size));
    let (pipe_reader, pipe_writer) = pipe(config.sync_memory_buffer as usize, overflow)?;
    let gauge = pipe_reader.gauge();
    let reader = CountingReader::new(pipe_reader);
    let loaded_bytes = reader.counter();
    let slave = &state.slave;
    let started = Instant::now();

    let result = {
        let receive = copy_rdb(&mut link.reader, pipe_writer, size, slave);
        let load = load_parallel(state.store.clone(), reader, loader_parallelism());
        let transfer = async { tokio::try_join!(receive, load) };
        tokio::pin!(transfer);

        let mut ticker = tokio::time::interval(PIPE_GAUGE_PERIOD);
        loop {
            tokio::select! {
                result = &mut transfer => break result,
                _ = ticker.tick() => slave.set_cache_bytes(gauge.buffered()),
            }
        }
    };
    slave.set_cache_bytes(0);
    let ((), keys) = result?;

    let mut crlf = [0u8; 2];
    tokio::time::timeout(RDB_READ_TIMEOUT, link.reader.read_exact(&mut crlf)).await??;
    if &crlf != b"\r\n" {
        return Err(QdbError::BadLineTerminator);
    }

    info!(
        "MASTER <-> SLAVE sync: loaded {} keys from {} bytes in {:?}",
        keys,
        loaded_bytes.load(Ordering::Relaxed),
        started.elapsed()
    );
    Ok(())
}

/// Copies exactly `size` bytes from the socket into the pipe.
async fn copy_rdb<R: AsyncRead + Unpin>(
    reader: &mut R,
    mut pipe: PipeWriter,
    size: u64,
    slave: &ReplicationSlave,
) -> Result<(), QdbError> {
    let mut buf = vec![0u8; RDB_READ_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let read = match tokio::time::timeout(RDB_READ_TIMEOUT, reader.read(&mut buf[..want])).await
        {
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "master closed the connection during the RDB transfer",
            )),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out reading the RDB from master",
            )),
        };
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                pipe.close_with_error(&e);
                return Err(e.into());
            }
        };
        pipe.write_all(&buf[..n]).await?;
        remaining -= n as u64;
        slave.add_total_bytes(n);
    }
    pipe.close();
    Ok(())
}

fn ack_frame(offset: i64) -> Result<Vec<u8>, QdbError> {
    RespFrame::command([
        Bytes::from_static(b"REPLCONF"),
        Bytes::from_static(b"ACK"),
        Bytes::from(offset.to_string()),
    ])
    .encode_to_vec()
}

async fn send_ack(slave: &ReplicationSlave, writer: &ConnWriter) -> Result<(), QdbError> {
    if let Some(offset) = slave.ack_offset() {
        writer
            .write_with_timeout(&ack_frame(offset)?, HANDSHAKE_TIMEOUT)
            .await?;
        debug!("Sent REPLCONF ACK {}", offset);
    }
    Ok(())
}

/// Applies the master's command stream until the link breaks.
async fn stream_commands(state: &Arc<ServerState>, link: MasterLink) -> Result<(), QdbError> {
    let slave = &state.slave;
    slave.set_link_state(LinkState::Connected);
    info!("Replication link is up; applying the command stream.");

    let MasterLink { reader, writer } = link;
    let writer = ConnWriter::new(writer);
    let mut frames = FramedRead::new(reader, ReplStreamCodec);
    let mut session = SessionState::master_link(slave.sync_db());

    send_ack(slave, &writer).await?;
    let mut last_ack = Instant::now();
    let mut ticker = tokio::time::interval(ACK_INTERVAL);

    loop {
        tokio::select! {
            next = frames.next() => {
                let Some(next) = next else {
                    return Ok(());
                };
                let (frame, consumed) = next?;
                apply_frame(state, &mut session, &writer, frame).await?;
                slave.advance(consumed, session.current_db);
            }
            _ = ticker.tick() => {}
        }
        if last_ack.elapsed() >= ACK_INTERVAL {
            send_ack(slave, &writer).await?;
            last_ack = Instant::now();
        }
    }
}

async fn apply_frame(
    state: &Arc<ServerState>,
    session: &mut SessionState,
    writer: &ConnWriter,
    frame: RespFrame,
) -> Result<(), QdbError> {
    let args = frame.into_args()?;
    let Some(name) = args.first() else {
        return Ok(());
    };

    if name.eq_ignore_ascii_case(b"PING") {
        return Ok(());
    }
    if name.eq_ignore_ascii_case(b"REPLCONF")
        && args.get(1).is_some_and(|a| a.eq_ignore_ascii_case(b"GETACK"))
    {
        return send_ack(&state.slave, writer).await;
    }

    let mut router = Router::new(state.clone(), session);
    match router.route(args).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_connection_fatal() => Err(e),
        Err(e) => {
            error!("Failed to apply a command from the master: {}", e);
            Ok(())
        }
    }
}

// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client
//! connection: the request loop, and slave mode once the peer issued `SYNC`/`PSYNC`.

use super::guard::ConnectionGuard;
use super::session::SessionState;
use super::writer::ConnWriter;
use crate::core::QdbError;
use crate::core::handler::command_router::{RouteResponse, Router};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::replication::{SlaveInfo, SyncRequest, serve_sync};
use crate::core::state::{ClientRole, ServerState};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// The next step for the connection's main loop to take.
enum NextAction {
    Continue,
    EnterSlaveMode(SyncRequest),
}

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler {
    frames: FramedRead<OwnedReadHalf, RespFrameCodec>,
    writer: ConnWriter,
    addr: SocketAddr,
    state: Arc<ServerState>,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let session = SessionState::new(session_id, state.requires_auth());
        Self {
            frames: FramedRead::new(read_half, RespFrameCodec),
            writer: ConnWriter::new(write_half),
            addr,
            state,
            session_id,
            shutdown_rx,
            global_shutdown_rx,
            session,
        }
    }

    /// Reads the next frame, honouring the idle timeout. `None` means the peer went
    /// away or stayed silent for too long.
    async fn next_frame(
        frames: &mut FramedRead<OwnedReadHalf, RespFrameCodec>,
        idle: Option<Duration>,
    ) -> Option<Result<RespFrame, QdbError>> {
        match idle {
            Some(idle) => tokio::time::timeout(idle, frames.next())
                .await
                .unwrap_or(None),
            None => frames.next().await,
        }
    }

    /// The main event loop for the connection, handling incoming frames and signals.
    pub async fn run(&mut self) -> Result<(), QdbError> {
        let mut guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        let idle = (self.state.config.conn_timeout > 0)
            .then(|| Duration::from_secs(self.state.config.conn_timeout));

        loop {
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    debug!("Connection handler for {} received global shutdown signal.", self.addr);
                    let msg = RespFrame::Error("SHUTDOWN Server is shutting down".to_string());
                    let _ = self.writer.send(&msg).await;
                    break;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received kill signal.", self.addr);
                    break;
                }
                result = Self::next_frame(&mut self.frames, idle) => {
                    match result {
                        Some(Ok(frame)) => match self.process_frame(frame).await {
                            Ok(NextAction::Continue) => self.update_client_last_activity().await,
                            Ok(NextAction::EnterSlaveMode(request)) => {
                                guard.set_slave();
                                self.run_slave_mode(request).await?;
                                break;
                            }
                            Err(e) => self.send_error_to_client(e).await?,
                        },
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                                // The stream cannot be resynchronized after a framing error.
                                if !matches!(e, QdbError::Io(_)) {
                                    let _ = self.send_error_to_client(e).await;
                                }
                            }
                            break;
                        }
                        None => {
                            debug!("Connection from {} closed or timed out.", self.addr);
                            break;
                        }
                    }
                }
            }
        }

        self.writer.shutdown().await;
        Ok(())
    }

    /// Routes one request and writes its reply.
    async fn process_frame(&mut self, frame: RespFrame) -> Result<NextAction, QdbError> {
        let args = frame.into_args()?;
        if args.is_empty() {
            return Ok(NextAction::Continue);
        }

        let mut router = Router::new(self.state.clone(), &mut self.session);
        match router.route(args).await? {
            RouteResponse::Single(response) => {
                self.writer.send(&response.into()).await?;
                Ok(NextAction::Continue)
            }
            RouteResponse::NoOp => Ok(NextAction::Continue),
            RouteResponse::Sync(request) => Ok(NextAction::EnterSlaveMode(request)),
        }
    }

    /// Turns this connection into a slave of this server. The master engine writes
    /// the sync reply and the command stream through the shared writer, while this
    /// loop only consumes `REPLCONF ACK` frames until the connection ends.
    async fn run_slave_mode(&mut self, request: SyncRequest) -> Result<(), QdbError> {
        let client = self
            .state
            .clients
            .get(&self.session_id)
            .map(|entry| entry.value().clone());
        let kill = match client {
            Some((client_info, kill)) => {
                client_info.lock().await.role = ClientRole::Slave;
                kill
            }
            None => broadcast::channel(1).0,
        };

        info!("Connection {} is becoming a slave.", self.addr);
        let slave = Arc::new(SlaveInfo::new(
            self.session_id,
            self.addr,
            self.session.listening_port,
            self.writer.clone(),
            kill,
        ));
        if let Err(e) = serve_sync(&self.state, request, slave).await {
            let _ = self.send_error_to_client(e).await;
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;
                _ = self.global_shutdown_rx.recv() => break,
                _ = self.shutdown_rx.recv() => {
                    debug!("Slave connection {} was closed by the master.", self.addr);
                    break;
                }
                frame = self.frames.next() => {
                    match frame {
                        Some(Ok(frame)) => self.handle_slave_frame(frame),
                        Some(Err(e)) => {
                            if !is_normal_disconnect(&e) {
                                warn!("Slave connection {} failed: {}", self.addr, e);
                            }
                            break;
                        }
                        None => {
                            info!("Slave {} disconnected.", self.addr);
                            break;
                        }
                    }
                }
            }
        }
        self.state.master.unregister_slave(self.session_id);
        Ok(())
    }

    fn handle_slave_frame(&self, frame: RespFrame) {
        let Ok(args) = frame.into_args() else {
            return;
        };
        let is_ack = args.len() == 3
            && args[0].eq_ignore_ascii_case(b"replconf")
            && args[1].eq_ignore_ascii_case(b"ack");
        if !is_ack {
            debug!("Ignoring a non-ACK frame from slave {}.", self.addr);
            return;
        }
        match std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse::<u64>().ok()) {
            Some(offset) => self.state.master.ack(self.session_id, offset),
            None => debug!("Slave {} sent a malformed ACK.", self.addr),
        }
    }

    /// Sends an error frame back to the client.
    async fn send_error_to_client(&self, e: QdbError) -> Result<(), QdbError> {
        let error_frame = RespFrame::Error(e.to_string());
        debug!(
            "Session {}: Sending error response: {:?}",
            self.session_id, error_frame
        );
        self.writer.send(&error_frame).await
    }

    async fn update_client_last_activity(&self) {
        let client_info = self
            .state
            .clients
            .get(&self.session_id)
            .map(|entry| entry.value().0.clone());
        if let Some(client_info) = client_info {
            let mut info = client_info.lock().await;
            info.last_command_time = Instant::now();
            info.db_index = self.session.current_db;
        }
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &QdbError) -> bool {
    matches!(e, QdbError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}

// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use qdb::config::Config;
use qdb::connection::SessionState;
use qdb::core::handler::command_router::{RouteResponse, Router};
use qdb::core::protocol::{RespFrame, RespFrameCodec};
use qdb::core::state::ServerState;
use qdb::core::{QdbError, RespValue};
use qdb::server::Server;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

/// Installs a test writer subscriber and returns a reload handle for server state.
pub fn init_tracing() -> Arc<qdb::core::state::LogReloadHandle> {
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new("warn"));
    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
    Arc::new(reload_handle)
}

/// A configuration suited to tests: ephemeral port, small backlog, files under `dir`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.listen_address = "127.0.0.1:0".to_string();
    config.repl_backlog_size = 1024 * 1024;
    config.repl_ping_slave_period = 1;
    config.sync_memory_buffer = 1024 * 1024;
    config.dump_filepath = dir.join("dump.rdb").to_string_lossy().into_owned();
    config
}

/// Builds an argument vector from string parts.
pub fn args(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

/// TestContext provides a server state without a listener; commands go through the
/// same router a client connection uses.
pub struct TestContext {
    pub state: Arc<ServerState>,
    pub session: SessionState,
    pub dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = test_config(dir.path());
        Self::with_config_in(config, dir).await
    }

    pub async fn with_config(mutate: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config(dir.path());
        mutate(&mut config);
        Self::with_config_in(config, dir).await
    }

    async fn with_config_in(config: Config, dir: TempDir) -> Self {
        let reload_handle = init_tracing();
        let server_init =
            ServerState::initialize(config, reload_handle).expect("Failed to initialize server state");
        let state = server_init.state;
        let session = SessionState::new(1, state.requires_auth());
        Self {
            state,
            session,
            dir,
        }
    }

    /// Routes one command and returns the raw route response.
    pub async fn route(&mut self, parts: &[&str]) -> Result<RouteResponse, QdbError> {
        let mut router = Router::new(self.state.clone(), &mut self.session);
        router.route(args(parts)).await
    }

    /// Routes one command and returns its reply value.
    pub async fn exec(&mut self, parts: &[&str]) -> Result<RespValue, QdbError> {
        match self.route(parts).await? {
            RouteResponse::Single(value) => Ok(value),
            other => panic!("unexpected route response {other:?}"),
        }
    }
}

/// A full server listening on a loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub dir: TempDir,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(mutate: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config(dir.path());
        mutate(&mut config);
        let server = Server::bind(config, init_tracing())
            .await
            .expect("server should bind");
        let addr = server.local_addr();
        let state = server.state();
        let task = tokio::spawn(server.serve());
        Self {
            addr,
            state,
            dir,
            task,
        }
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    /// True once the accept loop and the shutdown sequence have finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A RESP client over a real socket.
pub struct TestClient {
    framed: Framed<TcpStream, RespFrameCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            framed: Framed::new(stream, RespFrameCodec),
        }
    }

    pub async fn send(&mut self, parts: &[&str]) -> RespFrame {
        self.framed
            .send(RespFrame::command(args(parts)))
            .await
            .expect("send");
        tokio::time::timeout(Duration::from_secs(10), self.framed.next())
            .await
            .expect("reply timed out")
            .expect("connection closed")
            .expect("bad frame")
    }
}

/// Renders a bulk reply as text.
pub fn text(frame: &RespFrame) -> String {
    match frame {
        RespFrame::BulkString(b) => String::from_utf8_lossy(b).into_owned(),
        RespFrame::SimpleString(s) | RespFrame::Error(s) => s.clone(),
        other => panic!("expected a string reply, got {other:?}"),
    }
}

/// Polls `check` every 50ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

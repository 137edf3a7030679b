// src/connection/writer.rs

//! The write half of a connection, shared between the reply path, replication feeders
//! and the slave's ACK sender. Every write takes the lock, so frames from different
//! writers never interleave.

use crate::core::QdbError;
use crate::core::protocol::RespFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone)]
pub struct ConnWriter {
    inner: Arc<Mutex<BoxedWrite>>,
}

impl std::fmt::Debug for ConnWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnWriter").finish_non_exhaustive()
    }
}

impl ConnWriter {
    pub fn new<W: AsyncWrite + Send + Unpin + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Encodes and writes a single frame.
    pub async fn send(&self, frame: &RespFrame) -> Result<(), QdbError> {
        let encoded = frame.encode_to_vec()?;
        self.write_raw(&encoded).await
    }

    /// Writes pre-encoded bytes as one unit.
    pub async fn write_raw(&self, bytes: &[u8]) -> Result<(), QdbError> {
        let mut w = self.inner.lock().await;
        w.write_all(bytes).await?;
        w.flush().await?;
        Ok(())
    }

    /// Like `write_raw`, but fails with a timeout error after `deadline`.
    pub async fn write_with_timeout(&self, bytes: &[u8], deadline: Duration) -> Result<(), QdbError> {
        tokio::time::timeout(deadline, self.write_raw(bytes)).await?
    }

    /// Shuts down the write side of the socket.
    pub async fn shutdown(&self) {
        let _ = self.inner.lock().await.shutdown().await;
    }
}

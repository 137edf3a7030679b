// src/core/replication/pipe.rs

//! A bounded in-process pipe that decouples the replication socket from the RDB loader.
//!
//! Bytes are buffered in memory first. When an overflow file is configured and the
//! memory tier is full, further bytes spill into a file-backed ring. Once the file tier
//! holds data every new write goes there too, so readers always see bytes in the
//! order they were written. A writer facing two full tiers waits for the reader.

use super::backlog::{FileStorage, Storage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A FIFO over a fixed-size file.
struct FileRing {
    storage: FileStorage,
    head: u64,
    len: u64,
}

impl FileRing {
    fn capacity(&self) -> u64 {
        self.storage.capacity()
    }

    fn space(&self) -> u64 {
        self.capacity() - self.len
    }

    fn push(&mut self, buf: &[u8]) -> io::Result<usize> {
        let cap = self.capacity();
        let n = (buf.len() as u64).min(self.space()) as usize;
        if n == 0 {
            return Ok(0);
        }
        let tail = (self.head + self.len) % cap;
        let first = ((cap - tail) as usize).min(n);
        self.storage.write_at(&buf[..first], tail)?;
        if first < n {
            self.storage.write_at(&buf[first..n], 0)?;
        }
        self.len += n as u64;
        Ok(n)
    }

    fn pop(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = self.capacity();
        let n = (buf.len() as u64).min(self.len) as usize;
        if n == 0 {
            return Ok(0);
        }
        let first = ((cap - self.head) as usize).min(n);
        self.storage.read_at(&mut buf[..first], self.head)?;
        if first < n {
            self.storage.read_at(&mut buf[first..n], 0)?;
        }
        self.head = (self.head + n as u64) % cap;
        self.len -= n as u64;
        Ok(n)
    }
}

/// Why one side of the pipe went away.
#[derive(Clone)]
enum Closed {
    Clean,
    Error(io::ErrorKind, String),
}

impl Closed {
    fn to_error(&self, default: io::ErrorKind) -> io::Error {
        match self {
            Closed::Clean => io::Error::new(default, "pipe closed"),
            Closed::Error(kind, msg) => io::Error::new(*kind, msg.clone()),
        }
    }
}

struct PipeInner {
    mem: VecDeque<u8>,
    mem_cap: usize,
    file: Option<FileRing>,
    writer_closed: Option<Closed>,
    reader_closed: Option<Closed>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl PipeInner {
    fn buffered(&self) -> u64 {
        self.mem.len() as u64 + self.file.as_ref().map_or(0, |f| f.len)
    }

    fn file_len(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.len)
    }

    fn wake_reader(&mut self) {
        if let Some(w) = self.read_waker.take() {
            w.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(w) = self.write_waker.take() {
            w.wake();
        }
    }
}

/// Creates a pipe with a memory tier of `mem_cap` bytes and, when `file` is given,
/// an overflow ring at that path with the given size.
pub fn pipe(mem_cap: usize, file: Option<(&Path, u64)>) -> io::Result<(PipeReader, PipeWriter)> {
    let file = match file {
        Some((path, size)) if size > 0 => Some(FileRing {
            storage: FileStorage::open(path, size)?,
            head: 0,
            len: 0,
        }),
        _ => None,
    };
    let inner = Arc::new(Mutex::new(PipeInner {
        mem: VecDeque::with_capacity(mem_cap.min(64 * 1024)),
        mem_cap,
        file,
        writer_closed: None,
        reader_closed: None,
        read_waker: None,
        write_waker: None,
    }));
    Ok((
        PipeReader {
            inner: inner.clone(),
        },
        PipeWriter { inner },
    ))
}

/// Samples the number of bytes buffered in a pipe.
#[derive(Clone)]
pub struct PipeGauge {
    inner: Arc<Mutex<PipeInner>>,
}

impl PipeGauge {
    pub fn buffered(&self) -> u64 {
        self.inner.lock().buffered()
    }
}

pub struct PipeReader {
    inner: Arc<Mutex<PipeInner>>,
}

impl PipeReader {
    pub fn gauge(&self) -> PipeGauge {
        PipeGauge {
            inner: self.inner.clone(),
        }
    }

    pub fn buffered(&self) -> u64 {
        self.inner.lock().buffered()
    }

    /// Stops reading; a blocked or future write fails with `BrokenPipe`.
    pub fn close(&self) {
        self.close_as(Closed::Clean);
    }

    /// Stops reading; the writer's next write fails with `err`.
    pub fn close_with_error(&self, err: &io::Error) {
        self.close_as(Closed::Error(err.kind(), err.to_string()));
    }

    fn close_as(&self, reason: Closed) {
        let mut inner = self.inner.lock();
        if inner.reader_closed.is_none() {
            inner.reader_closed = Some(reason);
        }
        inner.wake_writer();
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if !inner.mem.is_empty() {
            let n = buf.remaining().min(inner.mem.len());
            let (front, back) = inner.mem.as_slices();
            let first = front.len().min(n);
            buf.put_slice(&front[..first]);
            if first < n {
                buf.put_slice(&back[..n - first]);
            }
            inner.mem.drain(..n);
            inner.wake_writer();
            return Poll::Ready(Ok(()));
        }

        if inner.file_len() > 0 {
            let mut tmp = vec![0u8; buf.remaining().min(inner.file_len() as usize)];
            let read = match inner.file.as_mut() {
                Some(file) => file.pop(&mut tmp),
                None => Ok(0),
            };
            return match read {
                Ok(n) => {
                    buf.put_slice(&tmp[..n]);
                    inner.wake_writer();
                    Poll::Ready(Ok(()))
                }
                Err(e) => Poll::Ready(Err(e)),
            };
        }

        match inner.writer_closed.clone() {
            Some(Closed::Clean) => Poll::Ready(Ok(())),
            Some(reason) => Poll::Ready(Err(reason.to_error(io::ErrorKind::BrokenPipe))),
            None => {
                inner.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

pub struct PipeWriter {
    inner: Arc<Mutex<PipeInner>>,
}

impl PipeWriter {
    pub fn buffered(&self) -> u64 {
        self.inner.lock().buffered()
    }

    /// Marks the end of the stream; the reader drains what is buffered, then sees EOF.
    pub fn close(&self) {
        self.close_as(Closed::Clean);
    }

    /// Ends the stream with an error the reader sees once the buffer is drained.
    pub fn close_with_error(&self, err: &io::Error) {
        self.close_as(Closed::Error(err.kind(), err.to_string()));
    }

    fn close_as(&self, reason: Closed) {
        let mut inner = self.inner.lock();
        if inner.writer_closed.is_none() {
            inner.writer_closed = Some(reason);
        }
        inner.wake_reader();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.reader_closed {
            return Poll::Ready(Err(reason.to_error(io::ErrorKind::BrokenPipe)));
        }
        if inner.writer_closed.is_some() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after close",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut written = 0;
        if inner.file_len() == 0 {
            let space = inner.mem_cap.saturating_sub(inner.mem.len());
            let n = space.min(buf.len());
            inner.mem.extend(&buf[..n]);
            written = n;
        }
        if written < buf.len()
            && let Some(file) = inner.file.as_mut()
        {
            match file.push(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if written == 0 => return Poll::Ready(Err(e)),
                Err(_) => {}
            }
        }

        if written == 0 {
            inner.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        inner.wake_reader();
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

// src/core/replication/backlog.rs

//! Implements the replication backlog, a fixed-size circular byte buffer holding the
//! most recent suffix of the replication stream.
//!
//! Replicas that reconnect with an offset still covered by the backlog can resume with
//! a partial resynchronization instead of a full RDB transfer. The ring knows nothing
//! about offsets; the master maps replication offsets onto ring positions.
//!
//! The bytes live either in memory or in a file truncated to the ring's capacity. Both
//! backends sit behind the `Storage` trait and behave identically.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// A fixed-size, randomly addressable byte store.
pub trait Storage: Send + Sync {
    /// Fills `buf` with the bytes at physical position `pos`.
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<()>;
    /// Writes `buf` at physical position `pos`.
    fn write_at(&mut self, buf: &[u8], pos: u64) -> io::Result<()>;
    fn capacity(&self) -> u64;
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory backend.
pub struct MemStorage {
    buf: Vec<u8>,
}

impl MemStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
        }
    }
}

impl Storage for MemStorage {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<()> {
        let start = pos as usize;
        let src = self
            .buf
            .get(start..start + buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "read out of range"))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> io::Result<()> {
        let start = pos as usize;
        let dst = self
            .buf
            .get_mut(start..start + buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write out of range"))?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.buf.len() as u64
    }

    fn close(&mut self) -> io::Result<()> {
        self.buf = Vec::new();
        Ok(())
    }
}

/// A file backend: the file is truncated to the capacity and addressed by offset.
pub struct FileStorage {
    file: Option<File>,
    capacity: u64,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>, capacity: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity)?;
        Ok(Self {
            file: Some(file),
            capacity,
        })
    }

    fn file(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "backlog file closed"))
    }
}

impl Storage for FileStorage {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> io::Result<()> {
        self.file()?.read_exact_at(buf, pos)
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> io::Result<()> {
        self.file()?.write_all_at(buf, pos)
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}

/// The ring itself.
pub struct Backlog {
    storage: Box<dyn Storage>,
    capacity: u64,
    /// Physical position of the next write.
    woff: u64,
    /// Number of valid bytes, saturating at `capacity`.
    len: u64,
}

impl Backlog {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        let capacity = storage.capacity();
        Self {
            storage,
            capacity,
            woff: 0,
            len: 0,
        }
    }

    /// An in-memory ring of `capacity` bytes.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Box::new(MemStorage::new(capacity)))
    }

    /// A file-backed ring of `capacity` bytes at `path`.
    pub fn with_file(path: impl AsRef<Path>, capacity: u64) -> io::Result<Self> {
        Ok(Self::new(Box::new(FileStorage::open(path, capacity)?)))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `p`, overwriting the oldest bytes when full. Only the trailing
    /// `capacity` bytes of an oversized write are kept. Returns `p.len()`.
    pub fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        if p.is_empty() || self.capacity == 0 {
            return Ok(p.len());
        }
        let total = p.len();
        let tail = if total as u64 > self.capacity {
            &p[total - self.capacity as usize..]
        } else {
            p
        };

        let first = (self.capacity - self.woff).min(tail.len() as u64) as usize;
        self.storage.write_at(&tail[..first], self.woff)?;
        if first < tail.len() {
            self.storage.write_at(&tail[first..], 0)?;
        }

        self.woff = (self.woff + tail.len() as u64) % self.capacity;
        self.len = (self.len + tail.len() as u64).min(self.capacity);
        Ok(total)
    }

    /// Copies up to `min(buf.len(), len - rel)` bytes starting `rel` bytes after the
    /// oldest stored byte. Returns the number of bytes copied; `rel == len` yields 0.
    pub fn read_at(&self, buf: &mut [u8], rel: u64) -> io::Result<usize> {
        if rel > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("backlog read at {rel} beyond length {}", self.len),
            ));
        }
        let n = (buf.len() as u64).min(self.len - rel) as usize;
        if n == 0 {
            return Ok(0);
        }
        let start = (self.woff + self.capacity - self.len + rel) % self.capacity;
        let first = ((self.capacity - start) as usize).min(n);
        self.storage.read_at(&mut buf[..first], start)?;
        if first < n {
            self.storage.read_at(&mut buf[first..n], 0)?;
        }
        Ok(n)
    }

    /// Releases the backing buffer or file.
    pub fn close(&mut self) -> io::Result<()> {
        self.len = 0;
        self.woff = 0;
        self.storage.close()
    }
}


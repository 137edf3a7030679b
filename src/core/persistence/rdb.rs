// src/core/persistence/rdb.rs

//! Implements the RDB dump format used for full resynchronization and for the dump file.
//!
//! Layout: magic, version, AUX fields, then entries. An entry is an optional
//! `SELECTDB` (emitted whenever the database changes), an optional `EXPIRETIME_MS`,
//! a type byte, the key and the value. The body ends with `EOF`, followed by a
//! little-endian CRC-64 of every preceding byte.
//!
//! The encoder is synchronous and is driven from a blocking thread; the decoder is
//! async so it can read straight from a socket or a pipe.

use crate::core::QdbError;
use crate::core::storage::data_types::{DataValue, MAX_STRING_SIZE, StoredValue};
use crate::core::storage::snapshot::SnapshotObject;
use crate::core::storage::unix_millis;
use bytes::{BufMut, Bytes, BytesMut};
use crc::{CRC_64_REDIS, Crc, Digest};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::io::{self, Write};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const RDB_MAGIC: &[u8] = b"QDBRDB";
pub const RDB_VERSION: &[u8] = b"0001";

const RDB_OPCODE_AUX: u8 = 0xFA;
const RDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const RDB_OPCODE_SELECTDB: u8 = 0xFE;
const RDB_OPCODE_EOF: u8 = 0xFF;

const RDB_TYPE_STRING: u8 = 0;
const RDB_TYPE_LIST: u8 = 1;
const RDB_TYPE_HASH: u8 = 4;

/// Number of objects each encoding thread handles at a time.
pub const RDB_BATCH_SIZE: usize = 1024;

static CHECKSUM_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// A single decoded key, as handed to the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct RdbEntry {
    pub db: u32,
    pub key: Bytes,
    pub value: DataValue,
    /// Absolute expiry in unix milliseconds.
    pub expire_at: Option<u64>,
}

// --- Encoder ---

/// A writer that feeds every byte it forwards into the running checksum.
struct ChecksumWriter<W> {
    inner: W,
    digest: Digest<'static, u64>,
    written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    fn put(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.digest.update(buf);
        self.written += buf.len() as u64;
        Ok(())
    }
}

/// Streams a dump into any `Write`.
pub struct RdbEncoder<W: Write> {
    out: ChecksumWriter<W>,
}

impl<W: Write> RdbEncoder<W> {
    /// Creates an encoder and writes the header.
    pub fn new(writer: W) -> io::Result<Self> {
        let mut encoder = Self {
            out: ChecksumWriter {
                inner: writer,
                digest: CHECKSUM_ALGO.digest(),
                written: 0,
            },
        };
        let mut header = BytesMut::new();
        header.put_slice(RDB_MAGIC);
        header.put_slice(RDB_VERSION);
        header.put_u8(RDB_OPCODE_AUX);
        write_string(&mut header, b"qdb-ver");
        write_string(&mut header, env!("CARGO_PKG_VERSION").as_bytes());
        header.put_u8(RDB_OPCODE_AUX);
        write_string(&mut header, b"ctime");
        write_string(&mut header, (unix_millis() / 1000).to_string().as_bytes());
        encoder.out.put(&header)?;
        Ok(encoder)
    }

    /// Encodes `objects` in chunks of `RDB_BATCH_SIZE`, one scoped thread per chunk,
    /// and writes the chunks in their original order. Expired objects are skipped.
    pub fn write_objects(&mut self, objects: &[SnapshotObject]) -> io::Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let now = unix_millis();
        let chunks: Vec<Bytes> = if objects.len() <= RDB_BATCH_SIZE {
            vec![encode_chunk(objects, now)]
        } else {
            std::thread::scope(|scope| {
                let handles: Vec<_> = objects
                    .chunks(RDB_BATCH_SIZE)
                    .map(|chunk| scope.spawn(move || encode_chunk(chunk, now)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .map_err(|_| io::Error::other("rdb encoding thread panicked"))
                    })
                    .collect::<io::Result<Vec<_>>>()
            })?
        };
        for chunk in chunks {
            self.out.put(&chunk)?;
        }
        Ok(())
    }

    /// Writes the `EOF` opcode and checksum footer, returning the writer and the
    /// total number of bytes written.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.out.put(&[RDB_OPCODE_EOF])?;
        let checksum = self.out.digest.finalize();
        self.out.inner.write_all(&checksum.to_le_bytes())?;
        self.out.inner.flush()?;
        Ok((self.out.inner, self.out.written + 8))
    }
}

/// Encodes one chunk. Each chunk starts with an unknown database so it always opens
/// with a `SELECTDB`, which keeps chunks independent of each other.
fn encode_chunk(objects: &[SnapshotObject], now_ms: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(objects.len() * 32);
    let mut current_db: Option<u32> = None;
    for obj in objects {
        if obj.value.is_expired(now_ms) {
            continue;
        }
        if current_db != Some(obj.db) {
            buf.put_u8(RDB_OPCODE_SELECTDB);
            write_length_encoding(&mut buf, u64::from(obj.db));
            current_db = Some(obj.db);
        }
        write_kv(&mut buf, &obj.key, &obj.value);
    }
    buf.freeze()
}

fn write_kv(buf: &mut BytesMut, key: &[u8], value: &StoredValue) {
    if let Some(expire_at) = value.expire_at {
        buf.put_u8(RDB_OPCODE_EXPIRETIME_MS);
        buf.put_u64_le(expire_at);
    }
    match &value.data {
        DataValue::String(s) => {
            buf.put_u8(RDB_TYPE_STRING);
            write_string(buf, key);
            write_string(buf, s);
        }
        DataValue::List(items) => {
            buf.put_u8(RDB_TYPE_LIST);
            write_string(buf, key);
            write_length_encoding(buf, items.len() as u64);
            for item in items {
                write_string(buf, item);
            }
        }
        DataValue::Hash(fields) => {
            buf.put_u8(RDB_TYPE_HASH);
            write_string(buf, key);
            write_length_encoding(buf, fields.len() as u64);
            for (field, val) in fields {
                write_string(buf, field);
                write_string(buf, val);
            }
        }
    }
}

fn write_string(buf: &mut BytesMut, s: &[u8]) {
    write_length_encoding(buf, s.len() as u64);
    buf.put_slice(s);
}

fn write_length_encoding(buf: &mut BytesMut, len: u64) {
    if len < (1 << 6) {
        buf.put_u8(len as u8);
    } else if len < (1 << 14) {
        buf.put_u16((len | (1 << 14)) as u16);
    } else if len < (1 << 32) {
        buf.put_u8(0x80);
        buf.put_u32(len as u32);
    } else {
        buf.put_u8(0x81);
        buf.put_u64(len);
    }
}

// --- Decoder ---

/// Reads entries from a dump one at a time, verifying the checksum at the footer.
pub struct RdbDecoder<R> {
    reader: R,
    digest: Digest<'static, u64>,
    databases: usize,
    current_db: u32,
    header_read: bool,
    finished: bool,
}

impl<R: AsyncRead + Unpin> RdbDecoder<R> {
    /// `databases` bounds the `SELECTDB` indexes the dump may contain.
    pub fn new(reader: R, databases: usize) -> Self {
        Self {
            reader,
            digest: CHECKSUM_ALGO.digest(),
            databases,
            current_db: 0,
            header_read: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    async fn read_u8(&mut self) -> Result<u8, QdbError> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b).await?;
        Ok(b[0])
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), QdbError> {
        self.reader.read_exact(buf).await.map_err(map_eof)?;
        self.digest.update(buf);
        Ok(())
    }

    async fn read_bytes(&mut self, len: usize) -> Result<Bytes, QdbError> {
        if len > MAX_STRING_SIZE {
            return Err(QdbError::Rdb(format!("string of {len} bytes exceeds limit")));
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn read_length(&mut self) -> Result<u64, QdbError> {
        let first = self.read_u8().await?;
        match (first & 0xC0) >> 6 {
            0b00 => Ok(u64::from(first & 0x3F)),
            0b01 => {
                let next = self.read_u8().await?;
                Ok((u64::from(first & 0x3F) << 8) | u64::from(next))
            }
            0b10 => match first & 0x3F {
                0 => {
                    let mut b = [0u8; 4];
                    self.read_exact(&mut b).await?;
                    Ok(u64::from(u32::from_be_bytes(b)))
                }
                1 => {
                    let mut b = [0u8; 8];
                    self.read_exact(&mut b).await?;
                    Ok(u64::from_be_bytes(b))
                }
                _ => Err(QdbError::Rdb("unknown length encoding".into())),
            },
            _ => Err(QdbError::Rdb(
                "special encoded string object not supported as length".into(),
            )),
        }
    }

    async fn read_string(&mut self) -> Result<Bytes, QdbError> {
        let len = self.read_length().await?;
        self.read_bytes(len as usize).await
    }

    async fn read_header(&mut self) -> Result<(), QdbError> {
        let mut magic = [0u8; 6];
        self.read_exact(&mut magic).await?;
        if magic != RDB_MAGIC {
            return Err(QdbError::Rdb("invalid magic string".into()));
        }
        let mut version = [0u8; 4];
        self.read_exact(&mut version).await?;
        if version != RDB_VERSION {
            return Err(QdbError::Rdb(format!(
                "unsupported version {}",
                String::from_utf8_lossy(&version)
            )));
        }
        self.header_read = true;
        Ok(())
    }

    /// Returns the next entry, or `None` once the footer has been read and verified.
    pub async fn next_entry(&mut self) -> Result<Option<RdbEntry>, QdbError> {
        if self.finished {
            return Ok(None);
        }
        if !self.header_read {
            self.read_header().await?;
        }
        let mut expire_at = None;
        loop {
            match self.read_u8().await? {
                RDB_OPCODE_EOF => {
                    let expected = self.digest.clone().finalize();
                    let mut footer = [0u8; 8];
                    self.reader.read_exact(&mut footer).await.map_err(map_eof)?;
                    if u64::from_le_bytes(footer) != expected {
                        return Err(QdbError::Rdb("checksum mismatch".into()));
                    }
                    self.finished = true;
                    return Ok(None);
                }
                RDB_OPCODE_AUX => {
                    self.read_string().await?;
                    self.read_string().await?;
                }
                RDB_OPCODE_SELECTDB => {
                    let db = self.read_length().await?;
                    if db >= self.databases as u64 {
                        return Err(QdbError::Rdb(format!(
                            "SELECTDB to out-of-range index {db}"
                        )));
                    }
                    self.current_db = db as u32;
                }
                RDB_OPCODE_EXPIRETIME_MS => {
                    let mut b = [0u8; 8];
                    self.read_exact(&mut b).await?;
                    expire_at = Some(u64::from_le_bytes(b));
                }
                value_type => {
                    let key = self.read_string().await?;
                    let value = self.read_value(value_type).await?;
                    return Ok(Some(RdbEntry {
                        db: self.current_db,
                        key,
                        value,
                        expire_at,
                    }));
                }
            }
        }
    }

    async fn read_value(&mut self, value_type: u8) -> Result<DataValue, QdbError> {
        match value_type {
            RDB_TYPE_STRING => Ok(DataValue::String(self.read_string().await?)),
            RDB_TYPE_LIST => {
                let len = self.read_length().await?;
                let mut items = VecDeque::new();
                for _ in 0..len {
                    items.push_back(self.read_string().await?);
                }
                Ok(DataValue::List(items))
            }
            RDB_TYPE_HASH => {
                let len = self.read_length().await?;
                let mut fields = IndexMap::new();
                for _ in 0..len {
                    let field = self.read_string().await?;
                    let value = self.read_string().await?;
                    fields.insert(field, value);
                }
                Ok(DataValue::Hash(fields))
            }
            other => Err(QdbError::Rdb(format!("unknown value type {other}"))),
        }
    }
}

fn map_eof(e: io::Error) -> QdbError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        QdbError::Rdb("unexpected end of data".into())
    } else {
        e.into()
    }
}

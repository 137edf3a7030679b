// src/core/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` for network communication.

use crate::core::QdbError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to prevent denial-of-service attacks.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024; // Max elements in an array.
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024; // 512MB max bulk string size.
const MAX_RECURSION_DEPTH: usize = 256; // Limit recursion to prevent stack overflow.

/// An enum representing a single frame in the RESP protocol.
/// This is the low-level representation of data exchanged between the client and server.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// A convenience method to encode a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, QdbError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Builds a command request, an array of bulk strings.
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespFrame::Array(
            parts
                .into_iter()
                .map(|p| RespFrame::BulkString(p.into()))
                .collect(),
        )
    }

    /// Flattens a request frame into its argument list. Requests must be arrays of
    /// bulk strings; anything else is a protocol error.
    pub fn into_args(self) -> Result<Vec<Bytes>, QdbError> {
        match self {
            RespFrame::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespFrame::BulkString(b) => Ok(b),
                    RespFrame::SimpleString(s) => Ok(Bytes::from(s)),
                    RespFrame::Integer(i) => Ok(Bytes::from(i.to_string())),
                    _ => Err(QdbError::Protocol("expected bulk string".into())),
                })
                .collect(),
            _ => Err(QdbError::Protocol("expected array of bulk strings".into())),
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = QdbError;

    /// Encodes a `RespFrame` into a `BytesMut` buffer according to the RESP specification.
    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut itoa_buf = itoa::Buffer::new();
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(itoa_buf.format(i).as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(itoa_buf.format(b.len()).as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::NullArray => {
                dst.extend_from_slice(b"*-1\r\n");
            }
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(itoa_buf.format(arr.len()).as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = QdbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_frame(src)?.map(|(frame, _)| frame))
    }
}

/// Decoder for the master-to-slave command stream. Every frame is paired with the
/// number of raw bytes it occupied on the wire, which the slave adds to its offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplStreamCodec;

impl Decoder for ReplStreamCodec {
    type Item = (RespFrame, usize);
    type Error = QdbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

/// Decodes one frame from the front of `src`, advancing it past the consumed bytes.
fn decode_frame(src: &mut BytesMut) -> Result<Option<(RespFrame, usize)>, QdbError> {
    if src.is_empty() {
        return Ok(None);
    }

    let mut bytes = &src[..];
    match decode_recursive(&mut bytes, 0) {
        Ok(frame) => {
            let len = src.len() - bytes.len();
            src.advance(len);
            Ok(Some((frame, len)))
        }
        // `IncompleteData` only means the frame has not fully arrived yet.
        Err(QdbError::IncompleteData) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decodes a `RespFrame`, advancing `bytes` as it is parsed.
fn decode_recursive(bytes: &mut &[u8], depth: usize) -> Result<RespFrame, QdbError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(QdbError::Protocol("nesting too deep".to_string()));
    }

    if bytes.is_empty() {
        return Err(QdbError::IncompleteData);
    }

    match bytes[0] {
        b'+' => {
            *bytes = &bytes[1..];
            let line = parse_line(bytes)?;
            Ok(RespFrame::SimpleString(
                String::from_utf8_lossy(line).to_string(),
            ))
        }
        b'-' => {
            *bytes = &bytes[1..];
            let line = parse_line(bytes)?;
            Ok(RespFrame::Error(String::from_utf8_lossy(line).to_string()))
        }
        b':' => {
            *bytes = &bytes[1..];
            let line = parse_line(bytes)?;
            Ok(RespFrame::Integer(parse_number(line)?))
        }
        b'$' => parse_bulk_string(bytes),
        b'*' => parse_array(bytes, depth),
        other => Err(QdbError::Protocol(format!(
            "invalid type byte '{}'",
            other.escape_ascii()
        ))),
    }
}

/// Returns the next line without its CRLF and advances past it.
fn parse_line<'a>(bytes: &mut &'a [u8]) -> Result<&'a [u8], QdbError> {
    if let Some(pos) = find_crlf(bytes) {
        let line = &bytes[..pos];
        *bytes = &bytes[pos + CRLF_LEN..];
        Ok(line)
    } else {
        Err(QdbError::IncompleteData)
    }
}

fn parse_number(line: &[u8]) -> Result<i64, QdbError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| QdbError::Protocol("invalid number".to_string()))
}

/// Parses a Bulk String (e.g., `$5\r\nhello\r\n`).
fn parse_bulk_string(bytes: &mut &[u8]) -> Result<RespFrame, QdbError> {
    *bytes = &bytes[1..];
    let line = parse_line(bytes)?;
    let str_len = parse_number(line)?;

    if str_len == -1 {
        return Ok(RespFrame::Null);
    }
    if str_len < 0 || str_len as usize > MAX_BULK_STRING_SIZE {
        return Err(QdbError::Protocol("invalid bulk length".to_string()));
    }

    let str_len = str_len as usize;
    if bytes.len() < str_len + CRLF_LEN {
        return Err(QdbError::IncompleteData);
    }
    if &bytes[str_len..str_len + CRLF_LEN] != CRLF {
        return Err(QdbError::BadLineTerminator);
    }

    let data = Bytes::copy_from_slice(&bytes[..str_len]);
    *bytes = &bytes[str_len + CRLF_LEN..];
    Ok(RespFrame::BulkString(data))
}

/// Parses an Array (e.g., `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`).
fn parse_array(bytes: &mut &[u8], depth: usize) -> Result<RespFrame, QdbError> {
    *bytes = &bytes[1..];
    let line = parse_line(bytes)?;
    let arr_len = parse_number(line)?;

    if arr_len == -1 {
        return Ok(RespFrame::NullArray);
    }
    if arr_len < 0 || arr_len as usize > MAX_FRAME_ELEMENTS {
        return Err(QdbError::Protocol("invalid multibulk length".to_string()));
    }

    let arr_len = arr_len as usize;
    let mut frames = Vec::with_capacity(arr_len.min(1024));
    for _ in 0..arr_len {
        frames.push(decode_recursive(bytes, depth + 1)?);
    }
    Ok(RespFrame::Array(frames))
}

/// Helper function to find the next CRLF sequence in a buffer.
fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

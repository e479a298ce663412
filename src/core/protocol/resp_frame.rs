// src/core/protocol/resp_frame.rs

//! Implements the RESP frame structure and the corresponding `Encoder` and
//! `Decoder` used on the client side of the proxy.

use crate::core::PeridotError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

// Protocol-level limits so a malformed or hostile frame cannot make the
// decoder allocate without bound.
const MAX_ARRAY_ELEMENTS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A single frame of the RESP protocol, request or response side.
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
    /// The `+OK` acknowledgement, used by every locally answered command.
    pub fn ok() -> RespFrame {
        RespFrame::SimpleString("OK".to_string())
    }

    /// Builds a bulk string frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> RespFrame {
        RespFrame::BulkString(data.into())
    }

    /// The frame's wire-type name, for diagnostics on unexpected replies.
    pub fn type_name(&self) -> &'static str {
        match self {
            RespFrame::SimpleString(_) => "Status",
            RespFrame::Error(_) => "Error",
            RespFrame::Integer(_) => "Int",
            RespFrame::BulkString(_) => "BulkBytes",
            RespFrame::Null => "NullBulk",
            RespFrame::NullArray => "NullArray",
            RespFrame::Array(_) => "Array",
        }
    }
}

/// A `tokio_util::codec` implementation for `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = PeridotError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => put_line(dst, b'+', s.as_bytes()),
            RespFrame::Error(s) => put_line(dst, b'-', s.as_bytes()),
            RespFrame::Integer(i) => put_line(dst, b':', i.to_string().as_bytes()),
            RespFrame::BulkString(b) => {
                put_line(dst, b'$', b.len().to_string().as_bytes());
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(items) => {
                put_line(dst, b'*', items.len().to_string().as_bytes());
                for frame in items {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = PeridotError;

    /// Returns `Ok(None)` while the buffer holds only a partial frame,
    /// letting the `Framed` stream wait for more bytes.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut parser = Parser {
            buf: &src[..],
            pos: 0,
        };
        match parser.frame() {
            Ok(frame) => {
                let consumed = parser.pos;
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(PeridotError::IncompleteFrame) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn put_line(dst: &mut BytesMut, prefix: u8, payload: &[u8]) {
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(payload);
    dst.extend_from_slice(CRLF);
}

/// A cursor over the receive buffer. Every read method either consumes
/// bytes past `pos` or fails with `IncompleteFrame`, leaving the buffer
/// untouched for the next poll.
struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn frame(&mut self) -> Result<RespFrame, PeridotError> {
        match self.byte()? {
            b'+' => {
                let line = self.line()?;
                Ok(RespFrame::SimpleString(
                    String::from_utf8_lossy(line).into_owned(),
                ))
            }
            b'-' => {
                let line = self.line()?;
                Ok(RespFrame::Error(String::from_utf8_lossy(line).into_owned()))
            }
            b':' => {
                let n = self.decimal_line()?;
                Ok(RespFrame::Integer(n))
            }
            b'$' => self.bulk_string(),
            b'*' => self.array(),
            other => Err(PeridotError::Protocol(format!(
                "invalid frame type byte {:#04x}",
                other
            ))),
        }
    }

    fn bulk_string(&mut self) -> Result<RespFrame, PeridotError> {
        let len = self.decimal_line()?;
        if len == -1 {
            return Ok(RespFrame::Null);
        }
        if len < 0 || len as usize > MAX_BULK_LEN {
            return Err(PeridotError::Protocol(format!(
                "bulk string length {len} out of range"
            )));
        }
        let len = len as usize;
        if self.buf.len() < self.pos + len + CRLF.len() {
            return Err(PeridotError::IncompleteFrame);
        }
        let data = Bytes::copy_from_slice(&self.buf[self.pos..self.pos + len]);
        if &self.buf[self.pos + len..self.pos + len + CRLF.len()] != CRLF {
            return Err(PeridotError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }
        self.pos += len + CRLF.len();
        Ok(RespFrame::BulkString(data))
    }

    fn array(&mut self) -> Result<RespFrame, PeridotError> {
        let len = self.decimal_line()?;
        if len == -1 {
            return Ok(RespFrame::NullArray);
        }
        if len < 0 || len as usize > MAX_ARRAY_ELEMENTS {
            return Err(PeridotError::Protocol(format!(
                "array length {len} out of range"
            )));
        }
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(self.frame()?);
        }
        Ok(RespFrame::Array(items))
    }

    fn byte(&mut self) -> Result<u8, PeridotError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(PeridotError::IncompleteFrame)?;
        self.pos += 1;
        Ok(b)
    }

    /// Consumes up to (and including) the next CRLF, returning the line body.
    fn line(&mut self) -> Result<&[u8], PeridotError> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        let end = rest
            .windows(CRLF.len())
            .position(|w| w == CRLF)
            .ok_or(PeridotError::IncompleteFrame)?;
        let line = &rest[..end];
        self.pos += end + CRLF.len();
        Ok(line)
    }

    fn decimal_line(&mut self) -> Result<i64, PeridotError> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                PeridotError::Protocol(format!(
                    "invalid decimal line {:?}",
                    String::from_utf8_lossy(line)
                ))
            })
    }
}

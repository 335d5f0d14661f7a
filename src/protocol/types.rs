//! Wire Frames
//!
//! stashkv speaks a small subset of RESP. A request is one array of scalar
//! fields; a reply is one scalar frame.
//!
//! ```text
//! request  *<n>\r\n  followed by n of:  $<len>\r\n<bytes>\r\n | :<int>\r\n | $-1\r\n
//! reply    +OK\r\n | $<len>\r\n<bytes>\r\n | -<KIND> <message>\r\n
//! ```
//!
//! Bulk payloads are length-prefixed, so keys and values may hold any bytes
//! including CR and LF.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

pub(crate) const CRLF: &[u8] = b"\r\n";

pub(crate) const ARRAY: u8 = b'*';
pub(crate) const BULK: u8 = b'$';
pub(crate) const INTEGER: u8 = b':';
pub(crate) const STATUS: u8 = b'+';
pub(crate) const ERROR: u8 = b'-';

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+<text>`; the only one sent is `+OK`
    Status(String),
    /// `-<KIND> <message>`
    Error(String),
    /// `:<n>`, used for `ttl_seconds`
    Integer(i64),
    /// `$<len>` followed by the bytes
    Bulk(Bytes),
    /// `$-1`, an absent optional field
    Null,
    /// `*<n>`, the request envelope; never nested
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Status("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Writes the frame to `dst`.
    ///
    /// Error text is kept on a single line; embedded CR or LF become spaces.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Status(text) => {
                dst.put_u8(STATUS);
                put_line(dst, text.as_bytes());
            }
            Frame::Error(text) => {
                dst.put_u8(ERROR);
                dst.extend(
                    text.bytes()
                        .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
                );
                dst.put_slice(CRLF);
            }
            Frame::Integer(n) => {
                dst.put_u8(INTEGER);
                put_line(dst, n.to_string().as_bytes());
            }
            Frame::Bulk(data) => {
                dst.reserve(data.len() + 16);
                dst.put_u8(BULK);
                put_line(dst, data.len().to_string().as_bytes());
                put_line(dst, data);
            }
            Frame::Null => {
                dst.put_u8(BULK);
                put_line(dst, b"-1");
            }
            Frame::Array(fields) => {
                dst.put_u8(ARRAY);
                put_line(dst, fields.len().to_string().as_bytes());
                for field in fields {
                    field.encode(dst);
                }
            }
        }
    }

    /// Encodes the frame into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }

    /// Frame kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Status(_) => "status",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk",
            Frame::Null => "null",
            Frame::Array(_) => "array",
        }
    }
}

fn put_line(dst: &mut BytesMut, line: &[u8]) {
    dst.put_slice(line);
    dst.put_slice(CRLF);
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Status(text) => write!(f, "+{}", text),
            Frame::Error(text) => write!(f, "-{}", text),
            Frame::Integer(n) => write!(f, ":{}", n),
            Frame::Bulk(data) => write!(f, "bulk({} bytes)", data.len()),
            Frame::Null => f.write_str("null"),
            Frame::Array(fields) => write!(f, "array({} fields)", fields.len()),
        }
    }
}

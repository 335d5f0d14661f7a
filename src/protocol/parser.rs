//! Frame Decoder
//!
//! Decodes one frame from the front of a connection buffer. Reads can split
//! a frame anywhere, so the decoder reports "incomplete" rather than failing
//! when it runs out of bytes, and the caller retries once more data arrives.
//!
//! The decoder is stateless: every call starts at the beginning of the
//! buffer and either yields a whole frame plus the number of bytes it used,
//! or consumes nothing.
//!
//! The server decodes with [`FrameDecoder::requests`], which accepts only a
//! flat array of one to four bulk, integer or null fields. The client
//! decodes with [`FrameDecoder::replies`], which accepts only a status,
//! error or bulk frame. Anything else is a protocol violation.

use crate::protocol::types::{Frame, ARRAY, BULK, CRLF, ERROR, INTEGER, STATUS};
use bytes::Bytes;
use thiserror::Error;

/// Largest bulk payload either side accepts (64 MiB). This caps cached values.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Longest header, status or error line.
const MAX_LINE: usize = 64 * 1024;

/// Field count bounds for a request array: the op, then key, value and ttl.
const MIN_FIELDS: i64 = 1;
const MAX_FIELDS: i64 = 4;

/// Errors decoding bytes into a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected {found:?} where {expected} was expected")]
    UnexpectedTag { found: char, expected: &'static str },

    #[error("invalid number in header: {0:?}")]
    InvalidInteger(String),

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("request has {0} fields, expected 1 to 4")]
    FieldCount(i64),

    #[error("bulk payload not terminated by CRLF")]
    MissingCrlf,

    #[error("line exceeds 64 KiB without CRLF")]
    LineTooLong,

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Returns early with `Ok(None)` when the buffer ends mid-frame.
macro_rules! ready {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Request,
    Reply,
}

/// Decodes request or reply frames out of a byte buffer.
///
/// ```
/// use stashkv::protocol::{Frame, FrameDecoder};
///
/// let wire = b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n";
/// let decoder = FrameDecoder::requests();
///
/// assert_eq!(decoder.decode(&wire[..10]), Ok(None));
///
/// let (frame, used) = decoder.decode(wire).unwrap().unwrap();
/// assert_eq!(used, wire.len());
/// assert_eq!(frame, Frame::Array(vec![Frame::bulk("get"), Frame::bulk("name")]));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    side: Side,
}

impl FrameDecoder {
    /// Decoder for the server side: request arrays only.
    pub fn requests() -> Self {
        Self {
            side: Side::Request,
        }
    }

    /// Decoder for the client side: single reply frames only.
    pub fn replies() -> Self {
        Self { side: Side::Reply }
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some((frame, used)))` with the number of bytes the frame
    /// occupied, `Ok(None)` if `buf` holds only part of a frame, or an error
    /// if the bytes can never form a valid frame.
    pub fn decode(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let mut cursor = Cursor { buf, pos: 0 };
        let frame = match self.side {
            Side::Request => ready!(cursor.request()?),
            Side::Reply => ready!(cursor.reply()?),
        };
        Ok(Some((frame, cursor.pos)))
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Takes the bytes up to the next CRLF and steps past it.
    fn line(&mut self) -> ParseResult<Option<&'a [u8]>> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        match rest.windows(2).position(|w| w == CRLF) {
            Some(end) => {
                self.pos += end + 2;
                Ok(Some(&rest[..end]))
            }
            None if rest.len() > MAX_LINE => Err(ParseError::LineTooLong),
            None => Ok(None),
        }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let buf = self.buf;
        let end = self.pos.checked_add(len)?;
        let taken = buf.get(self.pos..end)?;
        self.pos = end;
        Some(taken)
    }

    /// Reads the number following a one-byte tag, as in `*4` or `$-1`.
    fn header(&mut self) -> ParseResult<Option<i64>> {
        self.pos += 1;
        let line = ready!(self.line()?);
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Some)
            .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
    }

    fn text(&mut self) -> ParseResult<Option<String>> {
        self.pos += 1;
        let line = ready!(self.line()?);
        let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
        Ok(Some(text.to_string()))
    }

    fn bulk(&mut self) -> ParseResult<Option<Frame>> {
        let len = ready!(self.header()?);
        if len == -1 {
            return Ok(Some(Frame::Null));
        }
        let len = usize::try_from(len).map_err(|_| ParseError::InvalidLength(len))?;
        if len > MAX_FRAME_SIZE {
            return Err(ParseError::TooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let payload = ready!(self.take(len + 2));
        let (data, terminator) = payload.split_at(len);
        if terminator != CRLF {
            return Err(ParseError::MissingCrlf);
        }
        Ok(Some(Frame::Bulk(Bytes::copy_from_slice(data))))
    }

    fn request(&mut self) -> ParseResult<Option<Frame>> {
        match ready!(self.peek()) {
            ARRAY => {}
            other => return Err(unexpected(other, "a request array")),
        }

        let count = ready!(self.header()?);
        if !(MIN_FIELDS..=MAX_FIELDS).contains(&count) {
            return Err(ParseError::FieldCount(count));
        }

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let field = match ready!(self.peek()) {
                BULK => ready!(self.bulk()?),
                INTEGER => Frame::Integer(ready!(self.header()?)),
                other => return Err(unexpected(other, "a bulk or integer field")),
            };
            fields.push(field);
        }
        Ok(Some(Frame::Array(fields)))
    }

    fn reply(&mut self) -> ParseResult<Option<Frame>> {
        let frame = match ready!(self.peek()) {
            STATUS => Frame::Status(ready!(self.text()?)),
            ERROR => Frame::Error(ready!(self.text()?)),
            BULK => ready!(self.bulk()?),
            other => return Err(unexpected(other, "a reply")),
        };
        Ok(Some(frame))
    }
}

fn unexpected(tag: u8, expected: &'static str) -> ParseError {
    ParseError::UnexpectedTag {
        found: tag as char,
        expected,
    }
}

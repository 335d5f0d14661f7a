//! Cache Request and Response Messages
//!
//! Maps the cache's request/response shapes onto wire frames.
//!
//! ## Requests
//!
//! ```text
//! get     ──> *2  $op $key
//! delete  ──> *2  $op $key
//! put     ──> *3  $op $key $value
//!             *4  $op $key $value :ttl_seconds
//! ```
//!
//! ## Responses
//!
//! ```text
//! success              ──> +OK
//! success with value   ──> $<len> <value>
//! failure              ──> -<KIND> <message>
//! ```
//!
//! The failure kind travels as its own token, so clients never have to
//! interpret the human-readable message to tell a miss from an error.

use crate::protocol::types::Frame;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A cache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Put,
    Delete,
}

impl Op {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Get => "get",
            Op::Put => "put",
            Op::Delete => "delete",
        }
    }

    /// Parses an operation name, ignoring ASCII case.
    pub fn parse(name: &str) -> Option<Self> {
        [Op::Get, Op::Put, Op::Delete]
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors decoding a message out of a well-formed frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The frame does not have the shape of a request or response
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The request names an operation this server does not know.
    /// Unlike other decode errors, this one does not end the session.
    #[error("unknown op '{0}'")]
    UnknownOp(String),
}

/// A single cache request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub op: Op,
    pub key: String,
    /// Value to store; only meaningful for `put`
    pub value: Option<Bytes>,
    /// Requested lifetime in whole seconds; only meaningful for `put`.
    /// Absent or `<= 0` means "use the daemon default".
    pub ttl_seconds: Option<i64>,
}

impl Request {
    /// Builds a `get` request.
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            op: Op::Get,
            key: key.into(),
            value: None,
            ttl_seconds: None,
        }
    }

    /// Builds a `put` request. A zero `ttl` asks for the daemon default.
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>, ttl: Duration) -> Self {
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            op: Op::Put,
            key: key.into(),
            value: Some(value.into()),
            ttl_seconds: (secs > 0).then_some(secs),
        }
    }

    /// Builds a `delete` request.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: Op::Delete,
            key: key.into(),
            value: None,
            ttl_seconds: None,
        }
    }

    /// The TTL as a duration, with zero meaning "use the default".
    pub fn ttl(&self) -> Duration {
        match self.ttl_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => Duration::ZERO,
        }
    }

    /// Encodes the request as a request array.
    pub fn to_frame(&self) -> Frame {
        let mut fields = vec![
            Frame::bulk(self.op.as_str()),
            Frame::bulk(self.key.clone()),
        ];

        if self.op == Op::Put {
            fields.push(Frame::Bulk(self.value.clone().unwrap_or_default()));
            if let Some(ttl) = self.ttl_seconds {
                fields.push(Frame::Integer(ttl));
            }
        }

        Frame::Array(fields)
    }

    /// Decodes a request from a request array.
    ///
    /// The op is checked first: an unknown op is reported as
    /// [`MessageError::UnknownOp`] whatever the rest of the array holds.
    pub fn from_frame(frame: Frame) -> Result<Self, MessageError> {
        let mut fields = match frame {
            Frame::Array(fields) => fields.into_iter(),
            other => {
                return Err(MessageError::Malformed(format!(
                    "expected array, got {}",
                    other.kind()
                )))
            }
        };

        let op = match fields.next() {
            Some(Frame::Bulk(name)) => {
                let name = String::from_utf8_lossy(&name);
                Op::parse(&name).ok_or_else(|| MessageError::UnknownOp(name.into_owned()))?
            }
            Some(other) => {
                return Err(MessageError::Malformed(format!(
                    "op must be a bulk string, got {}",
                    other.kind()
                )))
            }
            None => return Err(MessageError::Malformed("empty request".to_string())),
        };

        let key = match fields.next() {
            Some(Frame::Bulk(key)) => String::from_utf8(key.to_vec())
                .map_err(|_| MessageError::Malformed("key is not valid UTF-8".to_string()))?,
            _ => return Err(MessageError::Malformed(format!("{} needs a key", op))),
        };

        let value = match fields.next() {
            None | Some(Frame::Null) => None,
            Some(Frame::Bulk(data)) => Some(data),
            Some(other) => {
                return Err(MessageError::Malformed(format!(
                    "value must be a bulk string, got {}",
                    other.kind()
                )))
            }
        };

        let ttl_seconds = match fields.next() {
            None | Some(Frame::Null) => None,
            Some(Frame::Integer(n)) => Some(n),
            Some(other) => {
                return Err(MessageError::Malformed(format!(
                    "ttl_seconds must be an integer, got {}",
                    other.kind()
                )))
            }
        };

        if fields.next().is_some() {
            return Err(MessageError::Malformed(
                "too many request fields".to_string(),
            ));
        }

        Ok(Self {
            op,
            key,
            value,
            ttl_seconds,
        })
    }
}

/// Machine-readable kind of a failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key absent from the store
    NotFound,
    /// Key present but past its expiration
    Expired,
    /// Durable storage failed
    Engine,
    /// The request named an unknown operation
    UnknownOp,
    /// The server is at its connection limit
    Busy,
    /// A payload exceeded the frame size limit
    TooLarge,
    /// A kind code this build does not know
    Other,
}

impl ErrorKind {
    /// Wire code of the kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Expired => "EXPIRED",
            ErrorKind::Engine => "ENGINE",
            ErrorKind::UnknownOp => "UNKNOWN_OP",
            ErrorKind::Busy => "BUSY",
            ErrorKind::TooLarge => "TOO_LARGE",
            ErrorKind::Other => "ERR",
        }
    }

    /// Parses a wire code. Unknown codes map to `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        [
            ErrorKind::NotFound,
            ErrorKind::Expired,
            ErrorKind::Engine,
            ErrorKind::UnknownOp,
            ErrorKind::Busy,
            ErrorKind::TooLarge,
        ]
        .into_iter()
        .find(|kind| kind.code() == code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single cache response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success without a value (`put`, `delete`)
    Ok,
    /// Success carrying the stored value (`get`)
    Value(Bytes),
    /// Failure with its kind and a human-readable message
    Error { kind: ErrorKind, message: String },
}

impl Response {
    /// Creates a failure response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }

    /// Returns true for `Ok` and `Value`.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error { .. })
    }

    /// Encodes the response as a reply frame.
    pub fn to_frame(&self) -> Frame {
        match self {
            Response::Ok => Frame::ok(),
            Response::Value(data) => Frame::Bulk(data.clone()),
            Response::Error { kind, message } => {
                Frame::Error(format!("{} {}", kind.code(), message))
            }
        }
    }

    /// Decodes a response from a reply frame.
    pub fn from_frame(frame: Frame) -> Result<Self, MessageError> {
        match frame {
            Frame::Status(s) if s == "OK" => Ok(Response::Ok),
            Frame::Bulk(data) => Ok(Response::Value(data)),
            Frame::Error(line) => {
                let (code, message) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                match ErrorKind::from_code(code) {
                    Some(kind) => Ok(Response::error(kind, message)),
                    None => Ok(Response::error(ErrorKind::Other, line)),
                }
            }
            other => Err(MessageError::Malformed(format!(
                "unexpected response frame: {}",
                other
            ))),
        }
    }
}

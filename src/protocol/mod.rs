//! Wire Protocol
//!
//! Requests and responses between the cache client and daemon are RESP
//! frames, one request and one response per exchange.
//!
//! ## Modules
//!
//! - `types`: The [`Frame`] enum and its encoding
//! - `parser`: [`FrameDecoder`], one side of the exchange at a time
//! - `message`: Cache `Request`/`Response` shapes over frames
//!
//! ## Example
//!
//! ```
//! use stashkv::protocol::{FrameDecoder, Request, Response};
//! use bytes::Bytes;
//!
//! let wire = Request::get("name").to_frame().to_bytes();
//! let (frame, used) = FrameDecoder::requests().decode(&wire).unwrap().unwrap();
//! assert_eq!(used, wire.len());
//!
//! let request = Request::from_frame(frame).unwrap();
//! assert_eq!(request.key, "name");
//!
//! let reply = Response::Value(Bytes::from("Ariz")).to_frame().to_bytes();
//! assert_eq!(&reply[..], b"$4\r\nAriz\r\n");
//! ```

pub mod message;
pub mod parser;
pub mod types;

pub use message::{ErrorKind, MessageError, Op, Request, Response};
pub use parser::{FrameDecoder, ParseError, ParseResult, MAX_FRAME_SIZE};
pub use types::Frame;

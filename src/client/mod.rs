//! Cache Client
//!
//! Gives a consumer process per-call access to the daemon's store. Every
//! operation dials the socket, performs exactly one request/response
//! exchange, and hangs up; nothing is pooled or reused.
//!
//! ## Outcomes
//!
//! ```text
//! get ──> Ok(Lookup::Found(value))
//!     ──> Ok(Lookup::NotFound)          (server kind NOT_FOUND)
//!     ──> Ok(Lookup::Expired)           (server kind EXPIRED)
//!     ──> Err(ClientError::Server {..}) (any other server failure)
//!     ──> Err(ClientError::Connect ..)  (no daemon: "no cache", not "no key")
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use stashkv::client::{CacheClient, Lookup};
//! use std::time::Duration;
//!
//! let client = CacheClient::new("/run/user/1000/stashkv/cache.sock");
//! client.put("page:1", "hello", Duration::from_secs(60)).await?;
//!
//! match client.get("page:1").await? {
//!     Lookup::Found(value) => println!("{:?}", value),
//!     Lookup::NotFound | Lookup::Expired => println!("miss"),
//! }
//! ```

use crate::protocol::{
    ErrorKind, Frame, FrameDecoder, ParseError, Request, Response, MAX_FRAME_SIZE,
};
use bytes::{Bytes, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::trace;

/// Dial timeout for data operations.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of a `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key holds a live value
    Found(Bytes),
    /// The key is absent
    NotFound,
    /// The key is present but past its expiration
    Expired,
}

impl Lookup {
    /// Returns the value if one was found.
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    /// True for `NotFound` and `Expired`.
    pub fn is_miss(&self) -> bool {
        !matches!(self, Lookup::Found(_))
    }
}

/// Errors surfaced by [`CacheClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket could not be dialed; no daemon is serving it.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The dial did not complete in time.
    #[error("timed out connecting to {path} after {timeout:?}")]
    ConnectTimeout { path: PathBuf, timeout: Duration },

    /// The connection failed mid-exchange.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The reply could not be decoded, or the peer hung up early.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The value is bigger than a single frame may carry; nothing was sent.
    #[error("value of {size} bytes exceeds the {max} byte limit")]
    ValueTooLarge { size: usize, max: usize },

    /// The server reported a failure other than a cache miss.
    #[error("server error ({kind}): {message}")]
    Server { kind: ErrorKind, message: String },
}

impl ClientError {
    /// True when the daemon could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::ConnectTimeout { .. }
        )
    }
}

impl From<ParseError> for ClientError {
    fn from(err: ParseError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Handle on the daemon's socket. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct CacheClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
}

impl CacheClient {
    /// Creates a client for the socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Path of the socket this client dials.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Fetches the value stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Lookup, ClientError> {
        match self.exchange(Request::get(key)).await? {
            Response::Value(value) => Ok(Lookup::Found(value)),
            Response::Error {
                kind: ErrorKind::NotFound,
                ..
            } => Ok(Lookup::NotFound),
            Response::Error {
                kind: ErrorKind::Expired,
                ..
            } => Ok(Lookup::Expired),
            Response::Error { kind, message } => Err(ClientError::Server { kind, message }),
            Response::Ok => Err(ClientError::Protocol(
                "get answered without a value".to_string(),
            )),
        }
    }

    /// Stores `value` under `key`. A zero `ttl` uses the daemon default.
    ///
    /// Values over [`MAX_FRAME_SIZE`] are refused before dialing.
    pub async fn put(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<(), ClientError> {
        let value = value.into();
        if value.len() > MAX_FRAME_SIZE {
            return Err(ClientError::ValueTooLarge {
                size: value.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let response = self.exchange(Request::put(key, value, ttl)).await?;
        expect_ok(response)
    }

    /// Removes `key`. Removing an absent key succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), ClientError> {
        let response = self.exchange(Request::delete(key)).await?;
        expect_ok(response)
    }

    /// Dials and immediately hangs up; succeeds iff a daemon is accepting.
    pub async fn probe(&self, timeout: Duration) -> Result<(), ClientError> {
        self.dial(timeout).await.map(drop)
    }

    async fn dial(&self, timeout: Duration) -> Result<UnixStream, ClientError> {
        match tokio::time::timeout(timeout, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ClientError::Connect {
                path: self.socket_path.clone(),
                source,
            }),
            Err(_) => Err(ClientError::ConnectTimeout {
                path: self.socket_path.clone(),
                timeout,
            }),
        }
    }

    /// One request, one response, one connection.
    async fn exchange(&self, request: Request) -> Result<Response, ClientError> {
        let mut stream = self.dial(self.connect_timeout).await?;

        let op = request.op;
        if let Err(e) = stream.write_all(&request.to_frame().to_bytes()).await {
            // The server may have answered and hung up without reading it all
            return match read_frame(&mut stream).await {
                Ok(frame) => {
                    Response::from_frame(frame).map_err(|e| ClientError::Protocol(e.to_string()))
                }
                Err(_) => Err(ClientError::Io(e)),
            };
        }
        stream.flush().await?;

        let frame = read_frame(&mut stream).await?;
        trace!(op = %op, frame = %frame, "Received response");

        Response::from_frame(frame).map_err(|e| ClientError::Protocol(e.to_string()))
    }
}

fn expect_ok(response: Response) -> Result<(), ClientError> {
    match response {
        Response::Ok => Ok(()),
        Response::Error { kind, message } => Err(ClientError::Server { kind, message }),
        Response::Value(_) => Err(ClientError::Protocol(
            "expected OK, got a value".to_string(),
        )),
    }
}

async fn read_frame(stream: &mut UnixStream) -> Result<Frame, ClientError> {
    let decoder = FrameDecoder::replies();
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        if let Some((frame, _)) = decoder.decode(&buffer)? {
            return Ok(frame);
        }

        if stream.read_buf(&mut buffer).await? == 0 {
            return Err(ClientError::Protocol(
                "connection closed before a full response".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::CacheServer;
    use crate::storage::record::now_since_epoch;
    use crate::storage::Store;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    fn start_server(dir: &TempDir, default_ttl: Duration) -> (CacheClient, Arc<Store>) {
        let store = Arc::new(
            Store::open(dir.path().join("cache.redb"), "cache", default_ttl).unwrap(),
        );
        let server =
            CacheServer::bind(dir.path().join("cache.sock"), Arc::clone(&store), 16).unwrap();
        let client = CacheClient::new(server.socket_path());
        tokio::spawn(server.run());
        (client, store)
    }

    /// Sleeps until `millis` into wall-clock second `second`.
    async fn sleep_until(second: u64, millis: u64) {
        let target = Duration::from_secs(second) + Duration::from_millis(millis);
        if let Some(wait) = target.checked_sub(now_since_epoch()) {
            tokio::time::sleep(wait).await;
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let (client, _) = start_server(&dir, Duration::ZERO);

        client.put("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(
            client.get("k").await.unwrap(),
            Lookup::Found(Bytes::from("v"))
        );

        client.delete("k").await.unwrap();
        assert_eq!(client.get("k").await.unwrap(), Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_binary_value() {
        let dir = TempDir::new().unwrap();
        let (client, _) = start_server(&dir, Duration::ZERO);

        let value = Bytes::from(vec![0u8, b'\r', b'\n', 0xff, b'$']);
        client.put("bin", value.clone(), Duration::ZERO).await.unwrap();
        assert_eq!(client.get("bin").await.unwrap(), Lookup::Found(value));
    }

    #[tokio::test]
    async fn test_default_ttl_scenario() {
        let dir = TempDir::new().unwrap();
        let (client, _) = start_server(&dir, Duration::from_secs(1));

        // Put at about x.95s, so the TTL ends inside second x+1
        let now = now_since_epoch();
        let second = now.as_secs() + u64::from(now.subsec_millis() >= 950);
        sleep_until(second, 950).await;

        client.put("k", "v", Duration::ZERO).await.unwrap();
        let written = now_since_epoch().as_secs();
        assert_eq!(
            client.get("k").await.unwrap(),
            Lookup::Found(Bytes::from("v"))
        );

        sleep_until(written + 2, 50).await;
        assert_eq!(client.get("k").await.unwrap(), Lookup::Expired);
    }

    #[tokio::test]
    async fn test_oversized_put_is_refused_locally() {
        let dir = TempDir::new().unwrap();
        let client = CacheClient::new(dir.path().join("missing.sock"));

        let value = Bytes::from(vec![0u8; MAX_FRAME_SIZE + 1]);
        match client.put("big", value, Duration::ZERO).await {
            Err(ClientError::ValueTooLarge { size, max }) => {
                assert_eq!(size, MAX_FRAME_SIZE + 1);
                assert_eq!(max, MAX_FRAME_SIZE);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engine_failure_is_opaque() {
        let dir = TempDir::new().unwrap();
        let (client, store) = start_server(&dir, Duration::ZERO);
        store.close();

        match client.get("k").await {
            Err(ClientError::Server { kind, .. }) => assert_eq!(kind, ErrorKind::Engine),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            client.put("k", "v", Duration::ZERO).await,
            Err(ClientError::Server {
                kind: ErrorKind::Engine,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_no_daemon_is_connect_error() {
        let dir = TempDir::new().unwrap();
        let client = CacheClient::new(dir.path().join("missing.sock"));

        let err = client.get("k").await.unwrap_err();
        assert!(err.is_unreachable());
        assert!(matches!(err, ClientError::Connect { .. }));
        assert!(client.probe(Duration::from_millis(200)).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_hangup_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("rude.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = stream.read(&mut buf).await;
                // Half a bulk string, then hang up
                let _ = stream.write_all(b"$10\r\nabc").await;
            }
        });

        let client = CacheClient::new(&socket_path);
        assert!(matches!(
            client.get("k").await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_one_connection_per_call() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            Store::open(dir.path().join("cache.redb"), "cache", Duration::ZERO).unwrap(),
        );
        let server =
            CacheServer::bind(dir.path().join("cache.sock"), Arc::clone(&store), 16).unwrap();
        let stats = server.stats();
        let client = CacheClient::new(server.socket_path());
        tokio::spawn(server.run());

        client.put("a", "1", Duration::ZERO).await.unwrap();
        client.get("a").await.unwrap();
        client.delete("a").await.unwrap();

        assert_eq!(
            stats
                .connections_accepted
                .load(std::sync::atomic::Ordering::Relaxed),
            3
        );
    }
}

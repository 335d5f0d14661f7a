//! Connection Handler Module
//!
//! One [`ConnectionHandler`] task serves one accepted socket. It decodes
//! request arrays out of a growing buffer and answers each with exactly one
//! reply frame, in order.
//!
//! ```text
//!  read_buf ──> buffer ──> FrameDecoder ──> Request ──> spawn_blocking ──> reply
//!     ▲                         │                        (Store call)        │
//!     └──── incomplete ─────────┘                                            │
//!     └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! How a session ends:
//!
//! - the peer hangs up between requests
//! - a request names an unknown op: answered with `UNKNOWN_OP`, session kept
//! - a payload over the size limit: answered with `TOO_LARGE`, then closed
//! - any other undecodable input: closed without a reply

use crate::commands::CommandHandler;
use crate::protocol::{
    ErrorKind, Frame, FrameDecoder, MessageError, ParseError, Request, Response, MAX_FRAME_SIZE,
};
use bytes::{Buf, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::UnixStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer: one full frame plus its headers
const MAX_BUFFER_SIZE: usize = MAX_FRAME_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Connections turned away because the server was at capacity
    pub connections_rejected: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests processed
    pub requests_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_processed(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, decoding, and response sending
/// for one connected client.
pub struct ConnectionHandler {
    /// The socket for this connection
    stream: BufWriter<UnixStream>,

    /// Per-server connection number (for logging)
    conn_id: u64,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Request-side frame decoder
    decoder: FrameDecoder,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted Unix socket
    /// * `conn_id` - Identifier used in log lines
    /// * `command_handler` - The command handler for executing requests
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: UnixStream,
        conn_id: u64,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            conn_id,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            decoder: FrameDecoder::requests(),
            stats,
        }
    }

    /// Runs the main connection loop.
    ///
    /// Reads requests, executes them, and sends back responses until the
    /// client disconnects or sends something undecodable.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(conn = self.conn_id, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(conn = self.conn_id, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(conn = self.conn_id, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset
                        || io_err.kind() == std::io::ErrorKind::BrokenPipe =>
                {
                    debug!(conn = self.conn_id, "Connection reset by client")
                }
                _ => warn!(conn = self.conn_id, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.next_frame().await? {
                let response = match Request::from_frame(frame) {
                    Ok(request) => self.execute(request).await,
                    Err(MessageError::UnknownOp(op)) => {
                        info!(conn = self.conn_id, op = %op, "Unknown operation");
                        Response::error(ErrorKind::UnknownOp, format!("unknown op '{}'", op))
                    }
                    Err(e) => {
                        warn!(conn = self.conn_id, error = %e, "Malformed request");
                        return Err(ConnectionError::Message(e));
                    }
                };

                self.stats.request_processed();
                self.send_response(&response.to_frame()).await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Runs a request on the blocking pool; store calls do file I/O.
    async fn execute(&self, request: Request) -> Response {
        let handler = self.command_handler.clone();
        let op = request.op;

        match tokio::task::spawn_blocking(move || handler.execute(request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(conn = self.conn_id, op = %op, error = %e, "Request task failed");
                Response::error(ErrorKind::Engine, format!("request task failed: {}", e))
            }
        }
    }

    /// Splits the next whole request frame off the buffer, if there is one.
    ///
    /// An oversized payload is answered with `TOO_LARGE` before the error
    /// ends the session; the rest of that payload is never read.
    async fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        match self.decoder.decode(&self.buffer) {
            Ok(Some((frame, used))) => {
                self.buffer.advance(used);
                trace!(
                    conn = self.conn_id,
                    used,
                    buffered = self.buffer.len(),
                    "Decoded frame"
                );
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(conn = self.conn_id, error = %e, "Undecodable request");
                if let ParseError::TooLarge { .. } = e {
                    let reply = Response::error(ErrorKind::TooLarge, e.to_string());
                    self.send_response(&reply.to_frame()).await?;
                }
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                conn = self.conn_id,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial frame in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(conn = self.conn_id, bytes = n, "Read data");

        Ok(())
    }

    /// Sends one reply frame to the client.
    async fn send_response(&mut self, response: &Frame) -> Result<(), ConnectionError> {
        let bytes = response.to_bytes();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(conn = self.conn_id, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error on the socket
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Bytes that can never form a request frame
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Well-framed but not a request
    #[error("Malformed request: {0}")]
    Message(MessageError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion, logging
/// only the endings that are not routine disconnects.
pub async fn handle_connection(
    stream: UnixStream,
    conn_id: u64,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, conn_id, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(conn = conn_id, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    async fn create_test_server(dir: &TempDir) -> (PathBuf, Arc<Store>, Arc<ConnectionStats>) {
        let socket_path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let store = Arc::new(
            Store::open(dir.path().join("cache.redb"), "cache", Duration::ZERO).unwrap(),
        );
        let stats = Arc::new(ConnectionStats::new());

        let store_clone = Arc::clone(&store);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            let mut next_id = 0;
            while let Ok((stream, _)) = listener.accept().await {
                next_id += 1;
                let handler = CommandHandler::new(Arc::clone(&store_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, next_id, handler, stats));
            }
        });

        (socket_path, store, stats)
    }

    async fn read_reply(client: &mut UnixStream) -> Vec<u8> {
        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nput\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_get_missing_reports_kind() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n")
            .await
            .unwrap();
        assert_eq!(
            read_reply(&mut client).await,
            b"-NOT_FOUND cache: not found\r\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_op_keeps_session() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();

        client
            .write_all(b"*2\r\n$4\r\nincr\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-UNKNOWN_OP "));

        // The same connection still serves requests
        client
            .write_all(b"*3\r\n$3\r\nput\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
    }

    #[tokio::test]
    async fn test_unknown_op_without_key_keeps_session() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nincr\r\n").await.unwrap();
        assert_eq!(
            read_reply(&mut client).await,
            b"-UNKNOWN_OP unknown op 'incr'\r\n"
        );

        client
            .write_all(b"*2\r\n$4\r\nincr\r\n$2\r\n\xff\xfe\r\n")
            .await
            .unwrap();
        assert!(read_reply(&mut client).await.starts_with(b"-UNKNOWN_OP "));

        client
            .write_all(b"*2\r\n$6\r\ndelete\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
    }

    #[tokio::test]
    async fn test_oversized_value_gets_reply_before_close() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        let header = format!(
            "*3\r\n$3\r\nput\r\n$1\r\nk\r\n${}\r\n",
            MAX_FRAME_SIZE + 1
        );
        client.write_all(header.as_bytes()).await.unwrap();

        let reply = read_reply(&mut client).await;
        assert!(
            reply.starts_with(b"-TOO_LARGE "),
            "{}",
            String::from_utf8_lossy(&reply)
        );

        let mut buf = [0u8; 64];
        let after = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(after, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_nested_array_closes_connection() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        client
            .write_all(b"*2\r\n*1\r\n$3\r\nget\r\n$1\r\nk\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_malformed_input_closes_connection() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        client.write_all(b"hello there\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_wrong_shape_closes_connection() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = create_test_server(&dir).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        client.write_all(b":42\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let dir = TempDir::new().unwrap();
        let (path, store, _) = create_test_server(&dir).await;
        store.put("split", b"value", Duration::ZERO).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        client.write_all(b"*2\r\n$3\r\nget\r\n$5\r\nsp").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"lit\r\n").await.unwrap();

        assert_eq!(read_reply(&mut client).await, b"$5\r\nvalue\r\n");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let dir = TempDir::new().unwrap();
        let (path, _, stats) = create_test_server(&dir).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = UnixStream::connect(&path).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client
            .write_all(b"*2\r\n$6\r\ndelete\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        let _ = read_reply(&mut client).await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.requests_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}

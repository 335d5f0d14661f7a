//! Unix Socket Server
//!
//! Owns the listening socket and the accept loop. Each accepted
//! connection runs in its own task; the number of live connections is
//! capped by a semaphore, and a client arriving while the server is full
//! gets a single `-BUSY` reply before being disconnected.
//!
//! ## Socket Setup
//!
//! ```text
//! create parent dir ──> remove stale socket file ──> bind ──> chmod 0600
//! ```
//!
//! The stale file is removed unconditionally. Callers must already hold
//! the store's file lock, which is what guarantees no live daemon owns
//! the socket being replaced.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::protocol::{ErrorKind, Response};
use crate::storage::Store;
use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Permissions applied to the socket file: owner read/write only.
pub const SOCKET_MODE: u32 = 0o600;

/// Errors setting up the listening socket.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create socket directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove stale socket {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to restrict permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The cache daemon's socket server.
pub struct CacheServer {
    listener: UnixListener,
    socket_path: PathBuf,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
    limit: Arc<Semaphore>,
    max_connections: usize,
}

impl CacheServer {
    /// Prepares and binds the socket at `socket_path`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(
        socket_path: impl AsRef<Path>,
        store: Arc<Store>,
        max_connections: usize,
    ) -> Result<Self, ServerError> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ServerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ServerError::RemoveStale {
                    path: socket_path,
                    source,
                })
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| ServerError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        fs::set_permissions(&socket_path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(
            |source| ServerError::Permissions {
                path: socket_path.clone(),
                source,
            },
        )?;

        let max_connections = max_connections.max(1);
        info!(
            path = %socket_path.display(),
            max_connections,
            "Listening on Unix socket"
        );

        Ok(Self {
            listener,
            socket_path,
            store,
            stats: Arc::new(ConnectionStats::new()),
            limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Path of the bound socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Shared connection statistics.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Upper bound on concurrently served connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Serves connections until the task is dropped.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serves connections until `shutdown` resolves, then removes the
    /// socket file. The store is left open for the caller to close.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
            }
        }

        match fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(path = %self.socket_path.display(), "Removed socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.socket_path.display(), error = %e, "Failed to remove socket"),
        }
    }

    /// Main loop that accepts incoming connections
    async fn accept_loop(&self) {
        let mut next_id: u64 = 0;

        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    next_id += 1;

                    let permit = match Arc::clone(&self.limit).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats.connection_rejected();
                            warn!(conn = next_id, "Connection limit reached, rejecting client");
                            tokio::spawn(reject_busy(stream));
                            continue;
                        }
                    };

                    let handler = CommandHandler::new(Arc::clone(&self.store));
                    let stats = Arc::clone(&self.stats);
                    let conn_id = next_id;

                    tokio::spawn(async move {
                        handle_connection(stream, conn_id, handler, stats).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Tells an over-limit client the server is busy, then hangs up.
async fn reject_busy(mut stream: UnixStream) {
    let reply = Response::error(ErrorKind::Busy, "server at connection limit")
        .to_frame()
        .to_bytes();

    if let Err(e) = stream.write_all(&reply).await {
        debug!(error = %e, "Failed to send busy reply");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn open_store(dir: &TempDir) -> Arc<Store> {
        Arc::new(Store::open(dir.path().join("cache.redb"), "cache", Duration::ZERO).unwrap())
    }

    async fn read_all(stream: &mut UnixStream) -> Vec<u8> {
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_socket_is_owner_only() {
        let dir = TempDir::new().unwrap();
        let server = CacheServer::bind(dir.path().join("cache.sock"), open_store(&dir), 4).unwrap();

        let mode = fs::metadata(server.socket_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SOCKET_MODE);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_file_and_creates_dir() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("nested").join("cache.sock");
        fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
        fs::write(&socket_path, b"stale").unwrap();

        let server = CacheServer::bind(&socket_path, open_store(&dir), 4).unwrap();
        assert_eq!(server.socket_path(), socket_path.as_path());

        let fresh = TempDir::new().unwrap();
        let deep = fresh.path().join("a").join("b").join("cache.sock");
        CacheServer::bind(&deep, open_store(&fresh), 4).unwrap();
        assert!(deep.exists());
    }

    #[tokio::test]
    async fn test_rejects_when_full() {
        let dir = TempDir::new().unwrap();
        let server = CacheServer::bind(dir.path().join("cache.sock"), open_store(&dir), 1).unwrap();
        let socket_path = server.socket_path().to_path_buf();
        let stats = server.stats();
        tokio::spawn(server.run());

        // Hold the only slot with a live session
        let mut first = UnixStream::connect(&socket_path).await.unwrap();
        first
            .write_all(b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = first.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"-NOT_FOUND"));

        let mut second = UnixStream::connect(&socket_path).await.unwrap();
        let reply = read_all(&mut second).await;
        assert!(reply.starts_with(b"-BUSY "));
        assert_eq!(
            stats
                .connections_rejected
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );

        // Releasing the slot lets the next client in
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut third = UnixStream::connect(&socket_path).await.unwrap();
        third
            .write_all(b"*2\r\n$6\r\ndelete\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        let n = third.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let dir = TempDir::new().unwrap();
        let server = CacheServer::bind(dir.path().join("cache.sock"), open_store(&dir), 4).unwrap();
        let socket_path = server.socket_path().to_path_buf();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        assert!(UnixStream::connect(&socket_path).await.is_ok());

        tx.send(()).unwrap();
        task.await.unwrap();

        assert!(!socket_path.exists());
        assert!(UnixStream::connect(&socket_path).await.is_err());
    }
}

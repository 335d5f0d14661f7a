//! # stashkv - A Persistent, TTL-Aware Key-Value Cache
//!
//! stashkv keeps a durable key-value cache in a single file owned by one
//! background daemon. Consumer processes reach it over a Unix socket, and
//! start the daemon themselves when nobody is serving yet.
//!
//! ## Features
//!
//! - **Durable**: Entries live in an embedded ACID file and survive restarts
//! - **TTL Support**: Per-put TTL with a daemon-wide default, checked lazily on read
//! - **Binary Safe**: Values are arbitrary bytes, framed with RESP on the wire
//! - **Self-Starting**: Consumers locate and launch the daemon on demand
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐          ┌───────────────────────────────────────┐
//! │       consumer process       │          │            stashkv-daemon             │
//! │                              │          │                                       │
//! │  Bootstrap ──> CacheClient ──┼── UDS ──>│ CacheServer ──> ConnectionHandler     │
//! │  (probe, locate, launch,     │  RESP    │ (admission       (one task per        │
//! │   poll)                      │          │  gate)            connection)         │
//! │                              │          │                        │              │
//! └──────────────────────────────┘          │                        ▼              │
//!                                           │                 CommandHandler        │
//!                                           │                        │ blocking pool│
//!                                           │                        ▼              │
//!                                           │     Store (RwLock) ──> redb file      │
//!                                           └───────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use stashkv::bootstrap::Bootstrap;
//! use stashkv::client::Lookup;
//! use stashkv::config::Config;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!
//!     // Probe the socket, starting the daemon if nobody answers
//!     let client = Bootstrap::new(&config.socket_path).connect().await?;
//!
//!     client.put("search:rust", "results...", Duration::from_secs(3600)).await?;
//!
//!     match client.get("search:rust").await? {
//!         Lookup::Found(value) => println!("hit: {} bytes", value.len()),
//!         Lookup::NotFound | Lookup::Expired => println!("miss"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Durable store with TTL records
//! - [`protocol`]: RESP framing plus cache request/response messages
//! - [`commands`]: Executes requests against the store
//! - [`connection`]: Per-connection request loop
//! - [`server`]: Unix socket setup and accept loop
//! - [`client`]: Per-call client with typed lookup outcomes
//! - [`bootstrap`]: Daemon probe, discovery and launch
//! - [`config`]: Environment-driven configuration
//! - [`logging`]: Subscriber installation for the binaries
//!
//! ## Design Highlights
//!
//! ### One Owner Per File
//!
//! The store file is locked by the daemon that opened it. A second daemon
//! fails to open the store and exits before it touches the socket, so
//! racing consumers cannot knock a live daemon off its socket.
//!
//! ### Lazy Expiry
//!
//! Entries carry an absolute expiration and are reported as expired when
//! read. Nothing sweeps them, so they stay on disk until overwritten or
//! deleted.
//!
//! ### Typed Failures on the Wire
//!
//! Failure responses carry a kind code ahead of the message, so the client
//! tells a miss from an expiry from an engine failure without reading
//! message text.

pub mod bootstrap;
pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use bootstrap::{Bootstrap, UnavailableError};
pub use client::{CacheClient, ClientError, Lookup};
pub use commands::CommandHandler;
pub use config::{Config, ConfigError};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ErrorKind, Frame, FrameDecoder, ParseError, Request, Response};
pub use server::{CacheServer, ServerError};
pub use storage::{Store, StoreError, StoreStats};

/// Name of the daemon executable that bootstrap looks for
pub const DAEMON_BINARY: &str = "stashkv-daemon";

/// Version of stashkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

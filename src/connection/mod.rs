//! Connection Handler Module
//!
//! This module manages individual client connections to the cache daemon.
//! Each client connection is handled by its own async task; the accept
//! loop that spawns them lives in [`crate::server`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Unix Socket Listener                       │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Decode req  │───>│ Execute op  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send resp   │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking socket operations
//! - **Buffer Management**: BytesMut buffer tolerates requests split across reads
//! - **Blocking Isolation**: Store calls run on Tokio's blocking pool
//! - **Statistics**: Tracks connection and request metrics
//!
//! ## Example
//!
//! ```ignore
//! use stashkv::connection::{handle_connection, ConnectionStats};
//! use stashkv::commands::CommandHandler;
//! use stashkv::storage::Store;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open("cache.redb", "cache", ttl)?);
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(store);
//!
//! // For each accepted connection...
//! let (stream, _) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, conn_id, handler, stats));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};

//! Command Handler
//!
//! Executes decoded cache requests against the [`Store`] and turns the
//! outcome into a [`Response`].
//!
//! ## Operations
//!
//! - `get key` - Returns the stored value, or a `NOT_FOUND`/`EXPIRED` failure
//! - `put key value [ttl_seconds]` - Stores a value; no TTL means the store default
//! - `delete key` - Removes a key; absent keys are not an error
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   Request   │───>│  dispatch() │───>│  Response   │     │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘     │
//! │                            │                                │
//! │                            ▼                                │
//! │                          Store                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store calls block on file I/O, so async callers should run
//! [`CommandHandler::execute`] on a blocking thread.

use crate::protocol::{ErrorKind, Op, Request, Response};
use crate::storage::{Store, StoreError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Executes cache requests against a shared store.
#[derive(Clone)]
pub struct CommandHandler {
    /// The durable store
    store: Arc<Store>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Executes a request and returns the response.
    pub fn execute(&self, request: Request) -> Response {
        match request.op {
            Op::Get => self.cmd_get(&request.key),
            Op::Put => {
                let ttl = request.ttl();
                let value = request.value.unwrap_or_default();
                self.cmd_put(&request.key, value, ttl)
            }
            Op::Delete => self.cmd_delete(&request.key),
        }
    }

    fn cmd_get(&self, key: &str) -> Response {
        match self.store.get(key) {
            Ok(value) => Response::Value(value),
            Err(e) => failure(key, e),
        }
    }

    fn cmd_put(&self, key: &str, value: Bytes, ttl: std::time::Duration) -> Response {
        match self.store.put(key, &value, ttl) {
            Ok(()) => Response::Ok,
            Err(e) => failure(key, e),
        }
    }

    fn cmd_delete(&self, key: &str) -> Response {
        match self.store.delete(key) {
            Ok(()) => Response::Ok,
            Err(e) => failure(key, e),
        }
    }
}

/// Maps a store failure onto a wire error kind.
impl From<&StoreError> for ErrorKind {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound => ErrorKind::NotFound,
            StoreError::Expired => ErrorKind::Expired,
            _ => ErrorKind::Engine,
        }
    }
}

fn failure(key: &str, err: StoreError) -> Response {
    if !err.is_miss() {
        warn!(key = key, error = %err, "Store operation failed");
    }
    Response::error(ErrorKind::from(&err), err.to_string())
}

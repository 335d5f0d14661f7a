//! Storage Engine Module
//!
//! This module provides the durable storage behind the cache daemon.
//! It is the only part of the crate that touches the cache file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │        RwLock (shared gets, exclusive puts/deletes)         │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ one transaction per operation
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                redb file  ──  table "<bucket>"              │
//! │           key ─> [expires_at (8, BE)][value bytes]          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Durable**: Entries survive daemon restarts
//! - **TTL Support**: Per-put TTL with a store-wide default
//! - **Lazy Expiry**: Expired entries are reported on read, never swept
//!
//! Because nothing sweeps, expired records occupy the file until they are
//! overwritten or deleted.

pub mod engine;
pub mod record;

// Re-export commonly used types
pub use engine::{Store, StoreError, StoreStats};

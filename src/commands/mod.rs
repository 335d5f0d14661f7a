//! Command Handler Module
//!
//! This module implements the request processing layer of the daemon.
//! It receives decoded requests, executes them against the store,
//! and returns the matching responses.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameDecoder   │  (protocol module)
//! └────────┬────────┘
//!          │ Request::from_frame
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Store       │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;

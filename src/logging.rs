//! Logging setup for the binaries.
//!
//! Library code only emits `tracing` events; a subscriber is installed by
//! whichever binary runs. The filter comes from `RUST_LOG`, defaulting to
//! `info`.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber.
///
/// With `log_file`, events are appended to that file without ANSI colors;
/// otherwise they go to stderr. Fails if the file cannot be opened.
pub fn init(log_file: Option<&Path>) -> io::Result<()> {
    let builder = fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_thread_ids(false);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(io::stderr).init(),
    }

    Ok(())
}

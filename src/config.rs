//! Configuration for stashkv
//!
//! Settings come from environment variables, read once into a [`Config`]
//! value that is passed down explicitly.
//!
//! | Variable                  | Default                          |
//! |---------------------------|----------------------------------|
//! | `STASHKV_SOCK`            | `<cache dir>/stashkv/cache.sock` |
//! | `STASHKV_DB`              | `<cache dir>/stashkv/cache.redb` |
//! | `STASHKV_BUCKET`          | `cache`                          |
//! | `STASHKV_DEFAULT_TTL`     | `900` (seconds)                  |
//! | `STASHKV_MAX_CONNECTIONS` | `1024`                           |
//! | `STASHKV_LOG`             | unset: log to stderr             |
//!
//! `<cache dir>` is `$XDG_CACHE_HOME`, else `$HOME/.cache`, else `.`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Socket path override.
pub const SOCKET_ENV: &str = "STASHKV_SOCK";
/// Durable file override.
pub const DB_ENV: &str = "STASHKV_DB";
/// Bucket name override.
pub const BUCKET_ENV: &str = "STASHKV_BUCKET";
/// Default TTL override, in whole seconds. `0` means entries never expire.
pub const DEFAULT_TTL_ENV: &str = "STASHKV_DEFAULT_TTL";
/// Connection limit override.
pub const MAX_CONNECTIONS_ENV: &str = "STASHKV_MAX_CONNECTIONS";
/// Daemon log file; when unset the daemon logs to stderr.
pub const LOG_FILE_ENV: &str = "STASHKV_LOG";

/// Directory under the user cache dir holding the socket and the file.
pub const APP_DIR: &str = "stashkv";

pub const DEFAULT_BUCKET: &str = "cache";
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Errors reading the configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be at least 1")]
    Zero { var: &'static str },
}

/// Main configuration shared by the daemon and consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------------
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// Durable cache file
    pub db_path: PathBuf,

    // -------------------------------------------------------------------------
    // Store
    // -------------------------------------------------------------------------
    /// Bucket (table) holding the entries
    pub bucket: String,

    /// TTL applied to puts that carry none; zero means "never expires"
    pub default_ttl: Duration,

    // -------------------------------------------------------------------------
    // Server
    // -------------------------------------------------------------------------
    /// Max concurrently served connections
    pub max_connections: usize,

    /// Append-only log file for the daemon
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::under(PathBuf::from(".").join(APP_DIR))
    }
}

impl Config {
    /// Defaults rooted at `dir`.
    fn under(dir: PathBuf) -> Self {
        Self {
            socket_path: dir.join("cache.sock"),
            db_path: dir.join("cache.redb"),
            bucket: DEFAULT_BUCKET.to_string(),
            default_ttl: DEFAULT_TTL,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_file: None,
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut config = Self::under(default_cache_dir(&get).join(APP_DIR));

        if let Some(sock) = get(SOCKET_ENV) {
            config.socket_path = PathBuf::from(sock);
        }
        if let Some(db) = get(DB_ENV) {
            config.db_path = PathBuf::from(db);
        }
        if let Some(bucket) = get(BUCKET_ENV) {
            config.bucket = bucket;
        }
        if let Some(ttl) = get(DEFAULT_TTL_ENV) {
            config.default_ttl = Duration::from_secs(parse_number(DEFAULT_TTL_ENV, &ttl)?);
        }
        if let Some(max) = get(MAX_CONNECTIONS_ENV) {
            let max = parse_number(MAX_CONNECTIONS_ENV, &max)?;
            if max == 0 {
                return Err(ConfigError::Zero {
                    var: MAX_CONNECTIONS_ENV,
                });
            }
            config.max_connections = usize::try_from(max).unwrap_or(usize::MAX);
        }
        config.log_file = get(LOG_FILE_ENV).map(PathBuf::from);

        Ok(config)
    }
}

fn default_cache_dir(get: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = get("XDG_CACHE_HOME") {
        return PathBuf::from(xdg);
    }
    if let Some(home) = get("HOME") {
        return PathBuf::from(home).join(".cache");
    }
    PathBuf::from(".")
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}

//! Durable, TTL-Aware Storage Engine
//!
//! This module implements the storage engine behind the cache daemon.
//! Entries live in a single `redb` file, inside one named table (the
//! "bucket"), as records prefixed with their absolute expiration time.
//!
//! ## Design Decisions
//!
//! 1. **One File, One Bucket**: The store owns the durable file exclusively.
//!    `redb` takes a file lock, so a second engine instance cannot open it.
//! 2. **Lazy Expiry**: Expiry is checked on read. Expired records are reported
//!    as [`StoreError::Expired`] but are never removed by a read.
//! 3. **One Transaction Per Operation**: Every put and delete commits its own
//!    write transaction, so a replaced value is never visible half-written.
//! 4. **Process-Wide RwLock**: On top of the engine's own transactions, gets
//!    take a shared lock and puts/deletes take an exclusive one.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │                                                             │
//! │   get ──┐                              ┌── put / delete     │
//! │         ▼                              ▼                    │
//! │   ┌──────────────── RwLock<Option<Database>> ────────────┐  │
//! │   │   read (shared)                  write (exclusive)   │  │
//! │   └──────────────────────────┬───────────────────────────┘  │
//! │                              ▼                              │
//! │                   redb table "<bucket>"                     │
//! │             key ─> [expires_at BE u64][value]               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::storage::record::{self, now_since_epoch, Record, EXPIRES_AT_SIZE};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Table definition for a bucket: string keys, raw record values.
type Bucket<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

/// Errors returned by the storage engine.
///
/// `NotFound` and `Expired` are ordinary lookup outcomes; everything else
/// is an engine failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent from the bucket.
    #[error("cache: not found")]
    NotFound,

    /// The key is present but past its absolute expiration.
    #[error("cache: expired")]
    Expired,

    /// The parent directory of the cache file could not be created.
    #[error("failed to create directory for {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache file could not be opened, created, or locked.
    #[error("failed to open cache file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: redb::Error,
    },

    /// A storage transaction failed.
    #[error("storage transaction failed: {0}")]
    Engine(#[from] redb::Error),

    /// A stored record is too short to hold its expiration prefix.
    #[error("corrupt record for key '{0}'")]
    CorruptRecord(String),

    /// The store was closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Returns true for lookup outcomes rather than engine failures.
    pub fn is_miss(&self) -> bool {
        matches!(self, StoreError::NotFound | StoreError::Expired)
    }
}

/// The persistent cache store.
///
/// # Thread Safety
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all connection handlers. All operations are thread-safe and blocking;
/// async callers should run them on the blocking pool.
///
/// # Example
///
/// ```no_run
/// use stashkv::storage::{Store, StoreError};
/// use std::time::Duration;
///
/// let store = Store::open("/tmp/cache.redb", "web", Duration::from_secs(900))?;
///
/// store.put("page:1", b"<html>", Duration::from_secs(60))?;
/// assert_eq!(&store.get("page:1")?[..], b"<html>");
///
/// store.delete("page:1")?;
/// assert!(matches!(store.get("page:1"), Err(StoreError::NotFound)));
/// # Ok::<(), StoreError>(())
/// ```
pub struct Store {
    /// The open database, or `None` once closed. The lock doubles as the
    /// process-wide read/write lock for data operations.
    db: RwLock<Option<Database>>,

    /// Path of the durable file
    path: PathBuf,

    /// Name of the table holding the entries
    bucket: String,

    /// TTL used when a put carries none. Zero means "never expires".
    default_ttl: Duration,

    /// Statistics: total get operations
    get_count: AtomicU64,

    /// Statistics: total put operations
    put_count: AtomicU64,

    /// Statistics: total delete operations
    del_count: AtomicU64,

    /// Statistics: gets that found an expired record
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("bucket", &self.bucket)
            .field("default_ttl", &self.default_ttl)
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("put_count", &self.put_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Store {
    /// Opens or creates the cache file at `path` and ensures `bucket` exists.
    ///
    /// Fails if the file cannot be opened or locked, for example because
    /// another daemon already holds it.
    pub fn open(
        path: impl AsRef<Path>,
        bucket: impl Into<String>,
        default_ttl: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let bucket = bucket.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: path.clone(),
                source,
            })?;
        }

        let db = Database::create(&path).map_err(|e| StoreError::Open {
            path: path.clone(),
            source: e.into(),
        })?;

        ensure_bucket(&db, Bucket::new(&bucket)).map_err(|source| StoreError::Open {
            path: path.clone(),
            source,
        })?;

        info!(
            path = %path.display(),
            bucket = %bucket,
            default_ttl_secs = default_ttl.as_secs(),
            "Cache store opened"
        );

        Ok(Self {
            db: RwLock::new(Some(db)),
            path,
            bucket,
            default_ttl,
            get_count: AtomicU64::new(0),
            put_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        })
    }

    #[inline]
    fn table(&self) -> Bucket<'_> {
        Bucket::new(&self.bucket)
    }

    fn read_db(&self) -> RwLockReadGuard<'_, Option<Database>> {
        self.db.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_db(&self) -> RwLockWriteGuard<'_, Option<Database>> {
        self.db.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// A non-zero `ttl` sets the expiration; `Duration::ZERO` falls back to
    /// the store default, and a zero default means the entry never expires.
    pub fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.put_count.fetch_add(1, Ordering::Relaxed);

        let expires_at = record::resolve_expires_at(now_since_epoch(), ttl, self.default_ttl);
        let raw = record::encode(expires_at, value);

        let guard = self.write_db();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        write_record(db, self.table(), key, &raw)?;

        debug!(key = key, bytes = value.len(), expires_at, "Stored entry");
        Ok(())
    }

    /// Gets the value for a key.
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent and
    /// [`StoreError::Expired`] if it is past its expiration. An expired
    /// record is left in place.
    pub fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let raw = {
            let guard = self.read_db();
            let db = guard.as_ref().ok_or(StoreError::Closed)?;
            read_record(db, self.table(), key)?
        };

        let raw = Bytes::from(raw.ok_or(StoreError::NotFound)?);
        let record =
            Record::decode(&raw).ok_or_else(|| StoreError::CorruptRecord(key.to_string()))?;

        if record.is_expired_at(now_since_epoch()) {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Expired);
        }

        Ok(raw.slice(EXPIRES_AT_SIZE..))
    }

    /// Deletes a key. Deleting an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let guard = self.write_db();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        let existed = remove_record(db, self.table(), key)?;

        debug!(key = key, existed, "Deleted entry");
        Ok(())
    }

    /// Releases the underlying file. Calling it again is a no-op.
    pub fn close(&self) {
        if self.write_db().take().is_some() {
            info!(path = %self.path.display(), "Cache store closed");
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.read_db().is_none()
    }

    /// Path of the durable file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the bucket holding the entries.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// TTL applied to puts that carry none.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns operation counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            get_ops: self.get_count.load(Ordering::Relaxed),
            put_ops: self.put_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired_reads: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Store operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub get_ops: u64,
    pub put_ops: u64,
    pub del_ops: u64,
    pub expired_reads: u64,
}

fn ensure_bucket(db: &Database, table: Bucket<'_>) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    txn.open_table(table)?;
    txn.commit()?;
    Ok(())
}

fn write_record(db: &Database, table: Bucket<'_>, key: &str, raw: &[u8]) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    {
        let mut entries = txn.open_table(table)?;
        entries.insert(key, raw)?;
    }
    txn.commit()?;
    Ok(())
}

fn read_record(db: &Database, table: Bucket<'_>, key: &str) -> Result<Option<Vec<u8>>, redb::Error> {
    let txn = db.begin_read()?;
    let entries = txn.open_table(table)?;
    let raw = entries.get(key)?.map(|guard| guard.value().to_vec());
    Ok(raw)
}

fn remove_record(db: &Database, table: Bucket<'_>, key: &str) -> Result<bool, redb::Error> {
    let txn = db.begin_write()?;
    let existed = {
        let mut entries = txn.open_table(table)?;
        let removed = entries.remove(key)?;
        removed.is_some()
    };
    txn.commit()?;
    Ok(existed)
}

//! Key-value store interface and implementations.
//!
//! The autosave engine talks to its persistent medium only through
//! [`KVStore`]. Three implementations are provided:
//!
//! - [`MemoryStore`]: a `HashMap` behind a lock, used as the fake in tests
//! - [`RedbStore`]: a single-table redb database on disk
//! - [`QuotaStore`]: wraps any store and refuses writes past a byte capacity
//!
//! Capacity failures are an expected condition and are reported as
//! [`KVError::QuotaExceeded`] rather than a panic.

pub mod memory;
pub mod quota;
pub mod redb;

use std::fmt;
use thiserror::Error;

/// Errors that can occur in KV store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KVError {
    #[error("kv: not found")]
    NotFound,

    #[error("kv: storage error: {0}")]
    Storage(String),

    #[error("kv: quota exceeded: need {needed} bytes, limit {limit} bytes")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("kv: store unavailable: {0}")]
    Unavailable(String),
}

impl KVError {
    /// Reports whether the store refused a write because it is full.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, KVError::QuotaExceeded { .. })
    }
}

/// Result type for KV operations.
pub type KVResult<T> = Result<T, KVError>;

/// Key-value store trait.
///
/// String keys, byte values. All operations are synchronous; a write either
/// lands or returns an error before the call returns.
pub trait KVStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>>;

    /// Set a key-value pair, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> KVResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> KVResult<()>;

    /// Scan for entries with a given prefix, sorted by key.
    fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>>;

    /// List keys with a given prefix, sorted.
    fn keys(&self, prefix: &str) -> KVResult<Vec<String>> {
        Ok(self.scan(prefix)?.into_iter().map(|(k, _)| k).collect())
    }

    /// Batch delete multiple keys.
    fn batch_delete(&self, keys: &[&str]) -> KVResult<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

impl fmt::Debug for dyn KVStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KVStore {{ ... }}")
    }
}

/// A boxed KV store for use in trait objects.
pub type BoxedKVStore = Box<dyn KVStore>;

pub use memory::MemoryStore;
pub use quota::QuotaStore;
pub use redb::RedbStore;

//! Byte-capacity enforcement over any [`KVStore`].

use parking_lot::Mutex;
use tracing::debug;

use crate::{KVError, KVResult, KVStore};

/// Wraps a store and refuses writes that would push the total size of the
/// underlying store past `limit` bytes.
///
/// Usage counts key bytes plus value bytes of every entry, including entries
/// written by other users of the same store. This mirrors a host-imposed
/// storage quota: the caller's own bookkeeping may not see everything that
/// counts against the limit.
pub struct QuotaStore<S> {
    inner: S,
    limit: u64,
    // Serializes the usage check with the write it guards.
    write_lock: Mutex<()>,
}

impl<S: KVStore> QuotaStore<S> {
    /// Wrap `inner` with a capacity of `limit` bytes.
    pub fn new(inner: S, limit: u64) -> Self {
        Self {
            inner,
            limit,
            write_lock: Mutex::new(()),
        }
    }

    /// The configured capacity in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes currently used across the whole underlying store.
    pub fn usage(&self) -> KVResult<u64> {
        Ok(self
            .inner
            .scan("")?
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }

    /// Access the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn entry_size(key: &str, value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

impl<S: KVStore> KVStore for QuotaStore<S> {
    fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> KVResult<()> {
        let _guard = self.write_lock.lock();

        let current = self.usage()?;
        let replaced = self
            .inner
            .get(key)?
            .map(|old| entry_size(key, &old))
            .unwrap_or(0);
        let needed = current - replaced + entry_size(key, value);
        if needed > self.limit {
            debug!(key, needed, limit = self.limit, "kv: quota refused write");
            return Err(KVError::QuotaExceeded {
                needed,
                limit: self.limit,
            });
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> KVResult<()> {
        self.inner.delete(key)
    }

    fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>> {
        self.inner.scan(prefix)
    }

    fn batch_delete(&self, keys: &[&str]) -> KVResult<()> {
        self.inner.batch_delete(keys)
    }
}

//! LRU-by-savedAt eviction over the autosave area of a store.
//!
//! Every write first makes room preemptively ([`make_room`]) from a full
//! enumeration of the store. Enumeration can be stale relative to what the
//! store itself counts (other writers, per-entry overhead), so the write path
//! also falls back to [`evict_oldest`] when the store refuses a write.

use draftcache_kv::{KVResult, KVStore};
use tracing::{debug, warn};

use crate::keys::logical_key;
use crate::record::{CacheEntry, StoredRecord};
use crate::timestamp::SavedAt;

/// Byte and entry-count limits for the autosave area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_bytes: u64,
    pub max_entries: usize,
}

impl Budget {
    /// Reports whether `count` records totalling `total` bytes plus one more
    /// record of `incoming` bytes stay within the budget.
    pub fn admits(&self, total: u64, count: usize, incoming: u64) -> bool {
        total + incoming <= self.max_bytes && count < self.max_entries
    }
}

/// One record found by enumeration.
///
/// Records that fail to decode have no timestamp; they sort before every
/// readable record and so are the first to go.
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub store_key: String,
    pub key: String,
    pub size: u64,
    pub saved_at: Option<SavedAt>,
    pub parent_key: Option<String>,
}

impl ScannedEntry {
    pub fn to_cache_entry(&self) -> Option<CacheEntry> {
        Some(CacheEntry {
            key: self.key.clone(),
            parent_key: self.parent_key.clone()?,
            size: self.size,
            saved_at: self.saved_at?,
        })
    }
}

/// Enumerate every record under `prefix`, oldest `savedAt` first.
/// Ties are broken by key.
pub fn scan_entries(store: &dyn KVStore, prefix: &str) -> KVResult<Vec<ScannedEntry>> {
    let mut entries: Vec<ScannedEntry> = store
        .scan(prefix)?
        .into_iter()
        .filter_map(|(store_key, data)| {
            let key = logical_key(prefix, &store_key)?.to_string();
            let record = StoredRecord::decode(&data);
            Some(ScannedEntry {
                size: data.len() as u64,
                saved_at: record.as_ref().map(|r| r.saved_at),
                parent_key: record.map(|r| r.parent_key),
                store_key,
                key,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.saved_at.cmp(&b.saved_at).then_with(|| a.key.cmp(&b.key)));
    Ok(entries)
}

/// Bytes and record count under `prefix`, leaving out `key`.
pub fn usage_excluding(store: &dyn KVStore, prefix: &str, key: &str) -> KVResult<(u64, usize)> {
    let others: Vec<ScannedEntry> = scan_entries(store, prefix)?
        .into_iter()
        .filter(|e| e.key != key)
        .collect();
    Ok((others.iter().map(|e| e.size).sum(), others.len()))
}

/// Outcome of [`make_room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomReport {
    /// Logical keys removed, oldest first.
    pub evicted: Vec<String>,
    /// Bytes held by the remaining records, excluding the key being written.
    pub total_size: u64,
    /// Remaining records, excluding the key being written.
    pub entry_count: usize,
    /// Whether the incoming record now fits the budget.
    pub fits: bool,
}

/// Evict the oldest records until a record of `incoming` bytes for `key`
/// fits the budget, or nothing evictable is left.
///
/// The current record for `key` is never a candidate and does not count
/// toward the totals, since the write replaces it.
pub fn make_room(
    store: &dyn KVStore,
    prefix: &str,
    key: &str,
    incoming: u64,
    budget: Budget,
) -> KVResult<RoomReport> {
    let candidates: Vec<ScannedEntry> = scan_entries(store, prefix)?
        .into_iter()
        .filter(|e| e.key != key)
        .collect();

    let mut total: u64 = candidates.iter().map(|e| e.size).sum();
    let mut count = candidates.len();
    let mut evicted = Vec::new();
    let mut oldest_first = candidates.into_iter();

    while !budget.admits(total, count, incoming) {
        let Some(victim) = oldest_first.next() else {
            break;
        };
        store.delete(&victim.store_key)?;
        total -= victim.size;
        count -= 1;
        if victim.saved_at.is_none() {
            warn!(key = %victim.key, "autosave: evicted unreadable record");
        } else {
            debug!(key = %victim.key, size = victim.size, "autosave: evicted to make room");
        }
        evicted.push(victim.key);
    }

    Ok(RoomReport {
        fits: budget.admits(total, count, incoming),
        evicted,
        total_size: total,
        entry_count: count,
    })
}

/// Remove up to `n` of the oldest records, skipping `exclude`.
/// Returns the removed logical keys, oldest first.
pub fn evict_oldest(
    store: &dyn KVStore,
    prefix: &str,
    n: usize,
    exclude: Option<&str>,
) -> KVResult<Vec<String>> {
    let victims: Vec<ScannedEntry> = scan_entries(store, prefix)?
        .into_iter()
        .filter(|e| Some(e.key.as_str()) != exclude)
        .take(n)
        .collect();
    if victims.is_empty() {
        return Ok(Vec::new());
    }

    let store_keys: Vec<&str> = victims.iter().map(|e| e.store_key.as_str()).collect();
    store.batch_delete(&store_keys)?;
    Ok(victims.into_iter().map(|e| e.key).collect())
}

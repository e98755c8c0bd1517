//! In-memory key-value store implementation for testing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{KVResult, KVStore};

/// An in-memory key-value store backed by a HashMap.
///
/// Clones share the same data, so a test can hand one clone to the code
/// under test and inspect the store through another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all prefixes.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl KVStore for MemoryStore {
    fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> KVResult<()> {
        self.data.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> KVResult<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>> {
        let data = self.data.lock();
        let mut results: Vec<(String, Vec<u8>)> = data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn batch_delete(&self, keys: &[&str]) -> KVResult<()> {
        let mut data = self.data.lock();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();

        store.set("draft:a", b"{}").unwrap();
        assert_eq!(store.get("draft:a").unwrap(), Some(b"{}".to_vec()));
        assert_eq!(store.get("draft:missing").unwrap(), None);

        store.delete("draft:a").unwrap();
        assert_eq!(store.get("draft:a").unwrap(), None);

        // Deleting twice is fine.
        store.delete("draft:a").unwrap();
    }

    #[test]
    fn test_scan_sorted_by_key() {
        let store = MemoryStore::new();
        store.set("autosave:img-2", b"2").unwrap();
        store.set("autosave:img-1", b"1").unwrap();
        store.set("settings:theme", b"dark").unwrap();

        let results = store.scan("autosave:").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "autosave:img-1");
        assert_eq!(results[1].0, "autosave:img-2");

        assert_eq!(
            store.keys("autosave:").unwrap(),
            vec!["autosave:img-1".to_string(), "autosave:img-2".to_string()]
        );
    }

    #[test]
    fn test_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", b"v").unwrap();
        assert_eq!(other.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_batch_delete() {
        let store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        store.set("b", b"2").unwrap();
        store.set("c", b"3").unwrap();

        store.batch_delete(&["a", "b", "missing"]).unwrap();
        assert_eq!(store.keys("").unwrap(), vec!["c".to_string()]);
    }
}

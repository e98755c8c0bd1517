//! Redb-based persistent key-value store implementation.

use std::fmt::Display;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::{KVError, KVResult, KVStore};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

fn storage(e: impl Display) -> KVError {
    KVError::Storage(e.to_string())
}

/// A persistent key-value store backed by redb.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> KVResult<Self> {
        let db = Database::create(path).map_err(|e| KVError::Unavailable(e.to_string()))?;

        // Create the table so readers never see a missing table.
        let tx = db.begin_write().map_err(storage)?;
        {
            let _ = tx.open_table(TABLE).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;

        Ok(Self { db })
    }
}

impl KVStore for RedbStore {
    fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(TABLE).map_err(storage)?;

        match table.get(key).map_err(storage)? {
            Some(value) => Ok(Some(value.value().to_vec())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> KVResult<()> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(TABLE).map_err(storage)?;
            table.insert(key, value).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> KVResult<()> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(TABLE).map_err(storage)?;
            table.remove(key).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(TABLE).map_err(storage)?;

        let mut results = Vec::new();
        for item in table.iter().map_err(storage)? {
            let (key, value) = item.map_err(storage)?;
            let key_str = key.value();
            if key_str.starts_with(prefix) {
                results.push((key_str.to_string(), value.value().to_vec()));
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn batch_delete(&self, keys: &[&str]) -> KVResult<()> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(TABLE).map_err(storage)?;
            for key in keys {
                table.remove(*key).map_err(storage)?;
            }
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_redb_basic() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("autosave.redb")).unwrap();

        store.set("autosave:a", b"value1").unwrap();
        assert_eq!(store.get("autosave:a").unwrap(), Some(b"value1".to_vec()));

        store.delete("autosave:a").unwrap();
        assert_eq!(store.get("autosave:a").unwrap(), None);
    }

    #[test]
    fn test_redb_scan_and_batch_delete() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("autosave.redb")).unwrap();

        store.set("autosave:b", b"2").unwrap();
        store.set("autosave:a", b"1").unwrap();
        store.set("other:c", b"3").unwrap();

        let results = store.scan("autosave:").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "autosave:a");

        store.batch_delete(&["autosave:a", "autosave:b"]).unwrap();
        assert!(store.scan("autosave:").unwrap().is_empty());
        assert_eq!(store.keys("").unwrap(), vec!["other:c".to_string()]);
    }

    #[test]
    fn test_redb_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autosave.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.set("autosave:a", b"kept").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("autosave:a").unwrap(), Some(b"kept".to_vec()));
    }
}

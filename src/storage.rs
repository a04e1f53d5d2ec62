use std::path::Path;

use redb::{Database, Durability, ReadableTable, TableDefinition};

use crate::error::{EngineError, Result};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

fn store_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Store(e.to_string())
}

/// Ordered key/value persistence over an embedded redb database.
///
/// Keys are opaque UTF-8 strings, values opaque bytes. Every put/delete
/// runs in its own write transaction and is atomic; with strict
/// durability the commit also fsyncs before returning. Scan iterates the
/// whole table in key order.
///
/// This store is the durable source of truth. The vector index layered
/// above it is derived and rebuildable, so nothing here knows about
/// slots or embeddings.
pub struct RecordStore {
    db: Database,
    durability: Durability,
}

impl RecordStore {
    /// Open (creating if missing) the database at `path`.
    pub fn open(path: &Path, strict_durability: bool) -> Result<Self> {
        let db = Database::create(path).map_err(store_err)?;

        // Materialize the table so the first read transaction finds it.
        let txn = db.begin_write().map_err(store_err)?;
        txn.open_table(RECORDS).map_err(store_err)?;
        txn.commit().map_err(store_err)?;

        let durability = if strict_durability {
            Durability::Immediate
        } else {
            Durability::Eventual
        };

        Ok(Self { db, durability })
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut txn = self.db.begin_write().map_err(store_err)?;
        txn.set_durability(self.durability);
        {
            let mut table = txn.open_table(RECORDS).map_err(store_err)?;
            table.insert(key, value).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(RECORDS).map_err(store_err)?;
        let value = table.get(key).map_err(store_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Delete `key`. Returns whether the key was present.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut txn = self.db.begin_write().map_err(store_err)?;
        txn.set_durability(self.durability);
        let existed = {
            let mut table = txn.open_table(RECORDS).map_err(store_err)?;
            let removed = table.remove(key).map_err(store_err)?.is_some();
            removed
        };
        txn.commit().map_err(store_err)?;
        Ok(existed)
    }

    /// Snapshot of every entry in key order.
    pub fn scan(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(RECORDS).map_err(store_err)?;

        let mut entries = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (key, value) = item.map_err(store_err)?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("kv.redb"), true).unwrap();

        assert_eq!(store.get("a").unwrap(), None);
        store.put("a", b"one").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"one".to_vec()));

        store.put("a", b"two").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"two".to_vec()));

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn scan_is_key_ordered() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("kv.redb"), true).unwrap();

        store.put("banana", b"2").unwrap();
        store.put("apple", b"1").unwrap();
        store.put("cherry", b"3").unwrap();

        let keys: Vec<String> = store.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn reopen_sees_committed_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.redb");

        {
            let store = RecordStore::open(&path, true).unwrap();
            store.put("persist", b"yes").unwrap();
        }

        let store = RecordStore::open(&path, true).unwrap();
        assert_eq!(store.get("persist").unwrap(), Some(b"yes".to_vec()));
    }
}

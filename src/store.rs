//! Blob stores holding serialized models by id.
//!
//! [`BlobStore`] is the only persistence seam the model knows about. Two
//! adapters ship with the crate: [`MemoryBlobStore`] for tests and
//! embedding, [`SqliteBlobStore`] for the command-line tool.

use std::path::Path;

use ahash::AHashMap;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::{config::StoreConfig, errors::ModelError, schema};

pub trait BlobStore {
    fn get(&self, id: &str) -> Result<Option<String>, ModelError>;
    fn put(&self, id: &str, body: &str) -> Result<(), ModelError>;
    fn bulk_put(&self, entries: &[(String, String)]) -> Result<(), ModelError>;
    /// Returns whether a blob was removed.
    fn delete(&self, id: &str) -> Result<bool, ModelError>;
    /// Stored ids in ascending order.
    fn list(&self) -> Result<Vec<String>, ModelError>;
}

impl<B> BlobStore for &B
where
    B: BlobStore + ?Sized,
{
    fn get(&self, id: &str) -> Result<Option<String>, ModelError> {
        (*self).get(id)
    }

    fn put(&self, id: &str, body: &str) -> Result<(), ModelError> {
        (*self).put(id, body)
    }

    fn bulk_put(&self, entries: &[(String, String)]) -> Result<(), ModelError> {
        (*self).bulk_put(entries)
    }

    fn delete(&self, id: &str) -> Result<bool, ModelError> {
        (*self).delete(id)
    }

    fn list(&self) -> Result<Vec<String>, ModelError> {
        (*self).list()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<AHashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, id: &str) -> Result<Option<String>, ModelError> {
        Ok(self.blobs.read().get(id).cloned())
    }

    fn put(&self, id: &str, body: &str) -> Result<(), ModelError> {
        self.blobs.write().insert(id.to_string(), body.to_string());
        Ok(())
    }

    fn bulk_put(&self, entries: &[(String, String)]) -> Result<(), ModelError> {
        let mut blobs = self.blobs.write();
        for (id, body) in entries {
            blobs.insert(id.clone(), body.clone());
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, ModelError> {
        Ok(self.blobs.write().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<String>, ModelError> {
        let mut ids: Vec<String> = self.blobs.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// SQLite-backed store; one row per model in `model_blobs`.
#[derive(Debug)]
pub struct SqliteBlobStore {
    conn: Connection,
}

impl SqliteBlobStore {
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self, ModelError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        if config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(path, flags).map_err(|e| ModelError::store(e.to_string()))?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory() -> Result<Self, ModelError> {
        let conn = Connection::open_in_memory().map_err(|e| ModelError::store(e.to_string()))?;
        Self::from_connection(conn, &StoreConfig::default())
    }

    fn from_connection(conn: Connection, config: &StoreConfig) -> Result<Self, ModelError> {
        if let Some(capacity) = config.cache_size {
            conn.set_prepared_statement_cache_capacity(capacity);
        }
        schema::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> Result<i64, ModelError> {
        schema::read_schema_version(&self.conn)
    }
}

impl BlobStore for SqliteBlobStore {
    fn get(&self, id: &str) -> Result<Option<String>, ModelError> {
        self.conn
            .query_row("SELECT body FROM model_blobs WHERE id=?1", [id], |row| row.get(0))
            .optional()
            .map_err(|e| ModelError::store(e.to_string()))
    }

    fn put(&self, id: &str, body: &str) -> Result<(), ModelError> {
        self.conn
            .prepare_cached(
                "INSERT INTO model_blobs(id, body) VALUES(?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET body=excluded.body, updated_at=CURRENT_TIMESTAMP",
            )
            .and_then(|mut stmt| stmt.execute(params![id, body]))
            .map(|_| ())
            .map_err(|e| ModelError::store(e.to_string()))
    }

    fn bulk_put(&self, entries: &[(String, String)]) -> Result<(), ModelError> {
        self.conn
            .execute("BEGIN IMMEDIATE", [])
            .map_err(|e| ModelError::store(e.to_string()))?;
        for (id, body) in entries {
            if let Err(err) = self.put(id, body) {
                let _ = self.conn.execute("ROLLBACK", []);
                return Err(err);
            }
        }
        self.conn
            .execute("COMMIT", [])
            .map_err(|e| ModelError::store(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, ModelError> {
        self.conn
            .execute("DELETE FROM model_blobs WHERE id=?1", [id])
            .map(|changed| changed > 0)
            .map_err(|e| ModelError::store(e.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, ModelError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM model_blobs ORDER BY id")
            .map_err(|e| ModelError::store(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ModelError::store(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ModelError::store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn BlobStore) {
        store.put("b", "{\"x\":1}").unwrap();
        store.put("a", "{}").unwrap();
        store.put("b", "{\"x\":2}").unwrap();
        assert_eq!(store.get("b").unwrap().as_deref(), Some("{\"x\":2}"));
        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
        store
            .bulk_put(&[("c".into(), "1".into()), ("d".into(), "2".into())])
            .unwrap();
        assert_eq!(store.list().unwrap().len(), 4);
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_store_contract() {
        exercise(&MemoryBlobStore::new());
    }

    #[test]
    fn test_sqlite_store_contract() {
        let store = SqliteBlobStore::open_in_memory().unwrap();
        exercise(&store);
        assert_eq!(store.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }
}

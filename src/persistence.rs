//! # SQLite Document Store
//!
//! Durable [`DocumentStore`] backed by a single SQLite table. Records are
//! stored as MessagePack blobs of their JSON value, one row per record, so
//! a mile log survives process restarts without rewriting the whole log on
//! every append.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::Result;
use crate::store::DocumentStore;

/// SQLite-backed document store.
pub struct SqliteStore {
    db: Connection,
    db_path: String,
}

impl SqliteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a store at the given database path.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;

        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            -- One row per record; rowid keeps insertion order
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            "#,
        )
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn encode(record: &Value) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(record)?)
}

fn decode(blob: &[u8]) -> Result<Value> {
    Ok(rmp_serde::from_slice(blob)?)
}

impl DocumentStore for SqliteStore {
    fn put(&mut self, collection: &str, id: &str, record: &Value) -> Result<()> {
        let blob = encode(record)?;
        // Upsert keeps the rowid, so a replaced record keeps its position
        self.db.execute(
            "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
            params![collection, id, blob],
        )?;
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let blob: Option<Vec<u8>> = self
            .db
            .query_row(
                "SELECT data FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        blob.map(|b| decode(&b)).transpose()
    }

    fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.db.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![collection, id],
        )?;
        Ok(removed > 0)
    }

    fn all(&self, collection: &str) -> Result<Vec<Value>> {
        let mut stmt = self
            .db
            .prepare("SELECT data FROM documents WHERE collection = ? ORDER BY rowid")?;

        let blobs = stmt
            .query_map(params![collection], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        blobs.iter().map(|b| decode(b)).collect()
    }

    fn clear(&mut self, collection: &str) -> Result<()> {
        self.db.execute(
            "DELETE FROM documents WHERE collection = ?",
            params![collection],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_get_roundtrip() {
        let mut store = SqliteStore::in_memory().unwrap();
        let record = json!({
            "id": 1700000000000u64,
            "sectionId": "s1",
            "mile": 2.5,
            "previousMile": null,
            "tags": ["a", "b"],
        });

        store.put("mile_logs", "1", &record).unwrap();
        assert_eq!(store.get("mile_logs", "1").unwrap(), Some(record));
        assert_eq!(store.get("mile_logs", "2").unwrap(), None);
    }

    #[test]
    fn test_upsert_keeps_order() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.put("c", "a", &json!({"v": 1})).unwrap();
        store.put("c", "b", &json!({"v": 2})).unwrap();
        store.put("c", "a", &json!({"v": 3})).unwrap();

        assert_eq!(store.all("c").unwrap(), vec![json!({"v": 3}), json!({"v": 2})]);
        assert_eq!(store.count("c").unwrap(), 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.put("c", "a", &json!(1)).unwrap();
        store.put("c", "b", &json!(2)).unwrap();
        store.put("other", "a", &json!(3)).unwrap();

        assert!(store.delete("c", "a").unwrap());
        assert!(!store.delete("c", "a").unwrap());

        store.clear("c").unwrap();
        assert_eq!(store.count("c").unwrap(), 0);
        assert_eq!(store.count("other").unwrap(), 1);
    }

    #[test]
    fn test_query_by_field() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.put("c", "1", &json!({"sectionId": "s1"})).unwrap();
        store.put("c", "2", &json!({"sectionId": "s2"})).unwrap();

        let hits = store.query_by_field("c", "sectionId", &json!("s2")).unwrap();
        assert_eq!(hits, vec![json!({"sectionId": "s2"})]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        {
            let mut store = SqliteStore::new(path).unwrap();
            store.put("c", "1", &json!({"kept": true})).unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        assert_eq!(store.get("c", "1").unwrap(), Some(json!({"kept": true})));
    }
}

//! Document store abstraction.
//!
//! A minimal collection/record store over JSON values, the shape of the
//! browser key-value database the planner persists into. [`MemoryStore`]
//! keeps everything in process; [`SqliteStore`](crate::SqliteStore) is the
//! durable implementation.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;

/// Generic record store keyed by collection and record id.
///
/// Records come back from [`all`](DocumentStore::all) and
/// [`query_by_field`](DocumentStore::query_by_field) in insertion order;
/// replacing a record keeps its original position.
pub trait DocumentStore: Send {
    fn put(&mut self, collection: &str, id: &str, record: &Value) -> Result<()>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Remove a record. Returns whether it existed.
    fn delete(&mut self, collection: &str, id: &str) -> Result<bool>;

    /// Records whose top-level `field` equals `value`.
    fn query_by_field(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Value>> {
        Ok(self
            .all(collection)?
            .into_iter()
            .filter(|record| record.get(field) == Some(value))
            .collect())
    }

    fn all(&self, collection: &str) -> Result<Vec<Value>>;

    /// Remove every record in a collection.
    fn clear(&mut self, collection: &str) -> Result<()>;
}

/// In-memory document store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<(String, Value)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }
}

impl DocumentStore for MemoryStore {
    fn put(&mut self, collection: &str, id: &str, record: &Value) -> Result<()> {
        let records = self.collections.entry(collection.to_string()).or_default();
        match records.iter_mut().find(|(key, _)| key == id) {
            Some((_, existing)) => *existing = record.clone(),
            None => records.push((id.to_string(), record.clone())),
        }
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.collections.get(collection).and_then(|records| {
            records
                .iter()
                .find(|(key, _)| key == id)
                .map(|(_, record)| record.clone())
        }))
    }

    fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        let Some(records) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|(key, _)| key != id);
        Ok(records.len() != before)
    }

    fn all(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .get(collection)
            .map(|records| records.iter().map(|(_, record)| record.clone()).collect())
            .unwrap_or_default())
    }

    fn clear(&mut self, collection: &str) -> Result<()> {
        self.collections.remove(collection);
        Ok(())
    }
}

//! In-process document store for isolated testing.

use crate::error::{DriverError, Result};
use crate::types::{CollectionKey, DeleteOutcome, Document, Filter, InsertOutcome, UpdateOutcome};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{apply_delete, apply_insert, apply_update, Connector, DocumentStore};

/// Collections held in memory. Survives reconnects when shared through
/// a [`MemoryConnector`].
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionKey, Vec<Document>>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub fn collection_count(&self) -> usize {
        self.collections.read().len()
    }

    fn check_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(DriverError::connection("memory", "store is offline"));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, key: &CollectionKey) -> Result<Vec<Document>> {
        self.check_online()?;
        Ok(self.collections.read().get(key).cloned().unwrap_or_default())
    }

    fn insert_many(&self, key: &CollectionKey, docs: Vec<Document>) -> Result<InsertOutcome> {
        self.check_online()?;
        let mut collections = self.collections.write();
        apply_insert(collections.entry(key.clone()).or_default(), docs)
    }

    fn update_one(
        &self,
        key: &CollectionKey,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<UpdateOutcome> {
        self.check_online()?;
        let mut collections = self.collections.write();
        Ok(match collections.get_mut(key) {
            Some(docs) => apply_update(docs, filter, patch),
            None => UpdateOutcome::default(),
        })
    }

    fn delete_one(&self, key: &CollectionKey, filter: &Filter) -> Result<DeleteOutcome> {
        self.check_online()?;
        let mut collections = self.collections.write();
        Ok(match collections.get_mut(key) {
            Some(docs) => apply_delete(docs, filter, true),
            None => DeleteOutcome::default(),
        })
    }

    fn delete_many(&self, key: &CollectionKey, filter: &Filter) -> Result<DeleteOutcome> {
        self.check_online()?;
        let mut collections = self.collections.write();
        Ok(match collections.get_mut(key) {
            Some(docs) => apply_delete(docs, filter, false),
            None => DeleteOutcome::default(),
        })
    }

    fn ping(&self) -> Result<()> {
        self.check_online()
    }
}

/// Hands out the same [`MemoryStore`] on every connect.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn DocumentStore>> {
        if self.store.is_offline() {
            return Err(DriverError::connection(address, "store is offline"));
        }
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shared_across_connects() {
        let connector = MemoryConnector::new();
        let key = CollectionKey::new("db", "items");
        let first = connector.connect("memory").unwrap();
        first
            .insert_one(&key, Document::from_value(json!({"n": 1})).unwrap())
            .unwrap();

        let second = connector.connect("memory").unwrap();
        assert_eq!(second.find(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_offline_fails_with_connection_error() {
        let connector = MemoryConnector::new();
        let handle = connector.connect("memory").unwrap();
        connector.store().set_offline(true);

        assert!(connector.connect("memory").err().unwrap().is_connection());
        assert!(handle
            .find(&CollectionKey::new("db", "items"))
            .unwrap_err()
            .is_connection());

        connector.store().set_offline(false);
        assert!(handle.ping().is_ok());
    }

    #[test]
    fn test_mutations_on_missing_collection_are_noops() {
        let store = MemoryStore::new();
        let key = CollectionKey::new("db", "none");
        assert_eq!(
            store.delete_many(&key, &Filter::All).unwrap(),
            DeleteOutcome::default()
        );
        assert_eq!(store.collection_count(), 0);
    }
}

//! Operation executor: runs mutations and republishes the affected view.
//!
//! Every mutation against a collection runs as one unit under that
//! collection's lock:
//!
//! 1. write through the connection gateway
//! 2. re-read the whole collection
//! 3. publish the new snapshot to the collection's view
//!
//! A failed write stops before the re-read, so subscribers never see the
//! effect of a write that reported failure. A failed re-read is returned to
//! the caller; the write itself already committed at the store.
//! Mutations on different collections run in parallel.

use crate::error::{DriverError, Result};
use crate::gateway::ConnectionGateway;
use crate::store::DocumentStore;
use crate::types::{CollectionKey, Document, Filter, OperationResult, OperationType, Snapshot};
use crate::views::{LiveView, ViewRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One exclusive section per collection key.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<CollectionKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn with_lock<R>(&self, key: &CollectionKey, f: impl FnOnce() -> R) -> R {
        let lock = self.locks.lock().entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // Nobody else holds or waits on this key
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Executes reads and mutations against the store and keeps the live
/// views current.
pub struct OperationExecutor {
    gateway: ConnectionGateway,
    registry: ViewRegistry,
    locks: KeyLocks,
    auto_register: bool,
}

impl OperationExecutor {
    pub fn new(gateway: ConnectionGateway, auto_register: bool) -> Self {
        Self {
            gateway,
            registry: ViewRegistry::new(),
            locks: KeyLocks::default(),
            auto_register,
        }
    }

    pub fn gateway(&self) -> &ConnectionGateway {
        &self.gateway
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    /// Full read of a collection straight from the store.
    pub fn fetch(&self, key: &CollectionKey) -> Result<Snapshot> {
        let documents = self.gateway.with_connection(|store| store.find(key))?;
        Ok(Snapshot::new(documents))
    }

    /// The view for `key`, materialized from the store on first access.
    pub fn resolve(&self, key: &CollectionKey) -> Result<Arc<LiveView>> {
        self.registry.resolve(key, || self.fetch(key))
    }

    // --- Mutations ---

    pub fn insert_one(&self, key: &CollectionKey, doc: Document) -> Result<OperationResult> {
        self.insert_many(key, vec![doc])
    }

    /// Insert documents. The store must acknowledge every one of them.
    pub fn insert_many(&self, key: &CollectionKey, docs: Vec<Document>) -> Result<OperationResult> {
        if docs.is_empty() {
            return Err(DriverError::InvalidDocument(
                "insert requires at least one document".to_string(),
            ));
        }
        let expected = docs.len();

        self.mutate(key, OperationType::Create, |store| {
            let outcome = store.insert_many(key, docs)?;
            if outcome.inserted_count != expected {
                return Err(DriverError::PartialWrite {
                    expected,
                    actual: outcome.inserted_count,
                });
            }
            Ok(OperationResult {
                operation: OperationType::Create,
                affected_count: outcome.inserted_count,
                affected_ids: outcome.inserted_ids,
            })
        })
    }

    /// Apply `new_doc`'s fields to the document identified by `old_doc`.
    ///
    /// Republishes even when nothing matched.
    pub fn update_one(
        &self,
        key: &CollectionKey,
        old_doc: &Document,
        new_doc: &Document,
    ) -> Result<OperationResult> {
        let filter = Filter::identifying(old_doc);
        let patch = new_doc.fields();

        self.mutate(key, OperationType::Update, |store| {
            let outcome = store.update_one(key, &filter, patch)?;
            Ok(OperationResult {
                operation: OperationType::Update,
                affected_count: outcome.matched_count,
                affected_ids: outcome.matched_id.into_iter().collect(),
            })
        })
    }

    /// Delete the document identified by `doc`. Deleting nothing is not an error.
    pub fn delete_one(&self, key: &CollectionKey, doc: &Document) -> Result<OperationResult> {
        let filter = Filter::identifying(doc);
        self.delete_matching(key, filter, true)
    }

    /// Delete every document in the collection.
    pub fn delete_all(&self, key: &CollectionKey) -> Result<OperationResult> {
        self.delete_matching(key, Filter::All, false)
    }

    fn delete_matching(
        &self,
        key: &CollectionKey,
        filter: Filter,
        single: bool,
    ) -> Result<OperationResult> {
        self.mutate(key, OperationType::Delete, |store| {
            let outcome = if single {
                store.delete_one(key, &filter)?
            } else {
                store.delete_many(key, &filter)?
            };
            Ok(OperationResult {
                operation: OperationType::Delete,
                affected_count: outcome.deleted_count,
                affected_ids: outcome.deleted_ids,
            })
        })
    }

    /// Write, re-read and publish as one unit under the key's lock.
    fn mutate<F>(
        &self,
        key: &CollectionKey,
        operation: OperationType,
        write: F,
    ) -> Result<OperationResult>
    where
        F: FnOnce(&dyn DocumentStore) -> Result<OperationResult>,
    {
        if !self.auto_register && !self.registry.contains(key) {
            return Err(DriverError::UnregisteredCollection(key.clone()));
        }

        self.locks.with_lock(key, || {
            let result = self.gateway.with_connection(write).map_err(|e| {
                warn!(key = %key, %operation, error = %e, "write failed");
                e
            })?;

            let snapshot = self.fetch(key).map_err(|e| {
                warn!(key = %key, %operation, error = %e, "re-read after write failed");
                e
            })?;

            self.registry.publish(key, snapshot);
            debug!(
                key = %key,
                %operation,
                affected = result.affected_count,
                "applied operation"
            );
            Ok(result)
        })
    }
}

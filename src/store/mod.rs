//! Document store interface.
//!
//! The driver consumes a store through two traits:
//! - [`Connector`] opens a handle for an address
//! - [`DocumentStore`] is the handle: find, insert, update and delete
//!
//! Two backends ship with the crate:
//! - [`file::FileConnector`]: directory-backed document store
//! - [`memory::MemoryConnector`]: in-process store for isolated testing

pub mod file;
pub mod memory;

use crate::error::{DriverError, Result};
use crate::types::{
    CollectionKey, DeleteOutcome, Document, DocumentId, Filter, InsertOutcome, UpdateOutcome,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

pub use file::{FileConnector, FileStore};
pub use memory::{MemoryConnector, MemoryStore};

/// An open handle to a document store.
///
/// Implementations must be safe to share between threads. Failures that
/// mean the handle itself is unusable are reported as
/// [`DriverError::Connection`]; rejected operations as
/// [`DriverError::StoreOperation`].
pub trait DocumentStore: Send + Sync {
    /// All documents in the collection, in insertion order.
    fn find(&self, key: &CollectionKey) -> Result<Vec<Document>>;

    /// Insert documents, assigning identities to those without one.
    fn insert_many(&self, key: &CollectionKey, docs: Vec<Document>) -> Result<InsertOutcome>;

    fn insert_one(&self, key: &CollectionKey, doc: Document) -> Result<InsertOutcome> {
        self.insert_many(key, vec![doc])
    }

    /// Apply `patch` to the first document matching `filter`.
    fn update_one(
        &self,
        key: &CollectionKey,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<UpdateOutcome>;

    /// Delete the first document matching `filter`.
    fn delete_one(&self, key: &CollectionKey, filter: &Filter) -> Result<DeleteOutcome>;

    /// Delete every document matching `filter`.
    fn delete_many(&self, key: &CollectionKey, filter: &Filter) -> Result<DeleteOutcome>;

    /// Check the handle is still usable.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens store handles.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn DocumentStore>>;
}

// --- Shared collection mutation helpers ---

/// Append `docs` to `existing`, assigning ids and rejecting duplicates.
///
/// Nothing is appended if any document is rejected.
pub(crate) fn apply_insert(
    existing: &mut Vec<Document>,
    docs: Vec<Document>,
) -> Result<InsertOutcome> {
    let mut seen: HashSet<DocumentId> = existing.iter().filter_map(|d| d.id().cloned()).collect();
    let mut prepared = Vec::with_capacity(docs.len());
    let mut inserted_ids = Vec::with_capacity(docs.len());

    for mut doc in docs {
        let id = match doc.id() {
            Some(id) => id.clone(),
            None => {
                let id = DocumentId::generate();
                doc.set_id(id.clone());
                id
            }
        };
        if !seen.insert(id.clone()) {
            return Err(DriverError::StoreOperation(format!("duplicate id {}", id)));
        }
        inserted_ids.push(id);
        prepared.push(doc);
    }

    existing.extend(prepared);
    Ok(InsertOutcome {
        inserted_count: inserted_ids.len(),
        inserted_ids,
    })
}

/// Merge `patch` into the first document matching `filter`.
pub(crate) fn apply_update(
    existing: &mut [Document],
    filter: &Filter,
    patch: &Map<String, Value>,
) -> UpdateOutcome {
    match existing.iter_mut().find(|d| filter.matches(d)) {
        Some(doc) => {
            let modified = doc.merge(patch);
            UpdateOutcome {
                matched_count: 1,
                modified_count: usize::from(modified),
                matched_id: doc.id().cloned(),
            }
        }
        None => UpdateOutcome::default(),
    }
}

/// Remove documents matching `filter`; at most one when `single`.
pub(crate) fn apply_delete(
    existing: &mut Vec<Document>,
    filter: &Filter,
    single: bool,
) -> DeleteOutcome {
    let mut deleted_ids = Vec::new();
    let mut deleted_count = 0;
    let mut kept = Vec::with_capacity(existing.len());

    for doc in existing.drain(..) {
        let take = filter.matches(&doc) && !(single && deleted_count == 1);
        if take {
            deleted_count += 1;
            if let Some(id) = doc.id() {
                deleted_ids.push(id.clone());
            }
        } else {
            kept.push(doc);
        }
    }

    *existing = kept;
    DeleteOutcome {
        deleted_count,
        deleted_ids,
    }
}

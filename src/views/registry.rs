//! Registry of live views, one per collection key.

use crate::error::{DriverError, Result};
use crate::types::{CollectionKey, Snapshot};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::live::LiveView;

type Slot = Arc<OnceCell<Arc<LiveView>>>;

/// Maps collection keys to their [`LiveView`]s.
///
/// Each key owns a creation slot. Concurrent first accesses to a key wait
/// on the same slot, so only one initial load runs and every caller gets
/// the same view. A slot whose load failed is dropped once nobody else
/// waits on it, and the next access retries the load.
#[derive(Default)]
pub struct ViewRegistry {
    slots: Mutex<HashMap<CollectionKey, Slot>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CollectionKey) -> Slot {
        self.slots.lock().entry(key.clone()).or_default().clone()
    }

    /// Return the view for `key`, materializing it with `load` if needed.
    ///
    /// `load` runs at most once per successful materialization and never
    /// while the registry map is locked.
    pub fn resolve<F>(&self, key: &CollectionKey, load: F) -> Result<Arc<LiveView>>
    where
        F: FnOnce() -> Result<Snapshot>,
    {
        let slot = self.slot(key);
        let result = slot
            .get_or_try_init(|| {
                let snapshot = load()?;
                debug!(key = %key, documents = snapshot.len(), "materialized view");
                Ok::<_, DriverError>(Arc::new(LiveView::new(key.clone(), snapshot)))
            })
            .map(Arc::clone);
        if result.is_err() {
            self.release_empty(key, slot);
        }
        result
    }

    /// Forget an uninitialized slot unless another caller holds it.
    fn release_empty(&self, key: &CollectionKey, slot: Slot) {
        let mut slots = self.slots.lock();
        let unused = slots
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, &slot) && current.get().is_none());
        // The map and `slot` itself are the only references
        if unused && Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }

    /// Publish `snapshot` to the view for `key`, creating the view with it
    /// as the initial snapshot when the key has none yet.
    pub fn publish(&self, key: &CollectionKey, snapshot: Snapshot) -> Arc<LiveView> {
        let slot = self.slot(key);
        let mut created = false;
        let view = slot
            .get_or_init(|| {
                created = true;
                debug!(key = %key, documents = snapshot.len(), "materialized view on write");
                Arc::new(LiveView::new(key.clone(), snapshot.clone()))
            })
            .clone();
        if !created {
            view.publish(snapshot);
        }
        view
    }

    /// The view for `key`, if materialized.
    pub fn get(&self, key: &CollectionKey) -> Option<Arc<LiveView>> {
        self.slots.lock().get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, key: &CollectionKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of materialized views.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Keys with a materialized view, sorted.
    pub fn keys(&self) -> Vec<CollectionKey> {
        let mut keys: Vec<_> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

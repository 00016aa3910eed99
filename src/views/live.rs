//! Per-collection live view with latest-value replay.

use crate::types::{CollectionKey, Snapshot};
use crossbeam_channel::{
    bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Unique identifier for a subscription within a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Internal subscriber state.
#[derive(Debug)]
struct Subscriber {
    sender: Sender<Snapshot>,
    /// Publisher-side clone of the receiver, used to evict a stale value.
    stale: Receiver<Snapshot>,
}

impl Subscriber {
    /// Deliver `snapshot`, replacing an undelivered older one.
    fn deliver(&self, snapshot: Snapshot) {
        match self.sender.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(snapshot)) => {
                let _ = self.stale.try_recv();
                // Publishes are serialized, so the slot is free now
                let _ = self.sender.try_send(snapshot);
            }
            // Unreachable while `stale` is held
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[derive(Debug)]
struct ViewState {
    latest: Snapshot,
    publish_count: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// Holds the latest snapshot of one collection and pushes every new one
/// to its subscribers.
///
/// Delivery is latest-value: each subscriber buffers at most one snapshot,
/// and a newer publish replaces a snapshot the subscriber hasn't taken yet.
/// Publishes are totally ordered per view.
#[derive(Debug)]
pub struct LiveView {
    key: CollectionKey,
    state: RwLock<ViewState>,
    next_id: AtomicU64,
}

impl LiveView {
    /// Create a view materialized with its first snapshot.
    pub fn new(key: CollectionKey, initial: Snapshot) -> Self {
        Self {
            key,
            state: RwLock::new(ViewState {
                latest: initial,
                publish_count: 0,
                subscribers: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Snapshot {
        self.state.read().latest.clone()
    }

    /// Number of publishes since the view was materialized.
    pub fn publish_count(&self) -> u64 {
        self.state.read().publish_count
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    /// Subscribe to this view.
    ///
    /// The current snapshot is already buffered when this returns.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(1);

        let mut state = self.state.write();
        let subscriber = Subscriber {
            sender,
            stale: receiver.clone(),
        };
        subscriber.deliver(state.latest.clone());
        state.subscribers.insert(id, subscriber);
        drop(state);

        debug!(key = %self.key, subscription = id.0, "subscribed to view");
        Subscription {
            id,
            key: self.key.clone(),
            receiver,
            view: Arc::downgrade(self),
            active: true,
        }
    }

    /// Replace the current snapshot and push it to every subscriber.
    pub fn publish(&self, snapshot: Snapshot) {
        let mut state = self.state.write();
        state.latest = snapshot.clone();
        state.publish_count += 1;
        for subscriber in state.subscribers.values() {
            subscriber.deliver(snapshot.clone());
        }
        debug!(
            key = %self.key,
            documents = snapshot.len(),
            subscribers = state.subscribers.len(),
            "published snapshot"
        );
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.state.write().subscribers.remove(&id).is_some();
        if removed {
            debug!(key = %self.key, subscription = id.0, "unsubscribed from view");
        }
        removed
    }
}

/// A stream of snapshots from one [`LiveView`].
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: SubscriptionId,
    key: CollectionKey,
    receiver: Receiver<Snapshot>,
    view: Weak<LiveView>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Receive the next snapshot (blocking).
    ///
    /// Fails once the subscription is unsubscribed and drained.
    pub fn recv(&self) -> Result<Snapshot, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a snapshot (non-blocking).
    pub fn try_recv(&self) -> Result<Snapshot, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Snapshot, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take the pending snapshot, if one is buffered.
    pub fn latest(&self) -> Option<Snapshot> {
        self.receiver.try_iter().last()
    }

    /// Stop delivery. Calling this more than once is harmless.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(view) = self.view.upgrade() {
            view.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

//! Connection gateway: sole owner of the store handle.

use crate::config::ConnectionPolicy;
use crate::error::{DriverError, Result};
use crate::store::{Connector, DocumentStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the store handle and lends it to operations.
///
/// Under [`ConnectionPolicy::Reuse`] the handle is opened on first use and
/// kept until an operation reports a connection failure, after which the
/// next call reconnects. Under [`ConnectionPolicy::PerCall`] every call
/// opens its own handle.
pub struct ConnectionGateway {
    address: String,
    policy: ConnectionPolicy,
    connector: Arc<dyn Connector>,
    /// Cached handle (Reuse policy only).
    handle: Mutex<Option<Arc<dyn DocumentStore>>>,
}

impl ConnectionGateway {
    pub fn new(
        connector: Arc<dyn Connector>,
        address: impl Into<String>,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            address: address.into(),
            policy,
            connector,
            handle: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    /// Whether a reusable handle is currently open.
    pub fn is_connected(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Run `f` against an open handle.
    ///
    /// A connection failure reported by `f` discards the cached handle so
    /// the next call reconnects.
    pub fn with_connection<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&dyn DocumentStore) -> Result<R>,
    {
        let store = self.acquire()?;
        let result = f(store.as_ref());
        if let Err(e) = &result {
            if e.is_connection() {
                self.invalidate(&store, e);
            }
        }
        result
    }

    /// Open (or reuse) a handle and ping it.
    pub fn check(&self) -> Result<()> {
        self.with_connection(|store| store.ping())
    }

    /// Drop the cached handle, if any.
    pub fn disconnect(&self) {
        if self.handle.lock().take().is_some() {
            info!(address = %self.address, "disconnected from store");
        }
    }

    fn acquire(&self) -> Result<Arc<dyn DocumentStore>> {
        match self.policy {
            ConnectionPolicy::PerCall => self.open(),
            ConnectionPolicy::Reuse => {
                // Held across open so concurrent first callers share one connect
                let mut handle = self.handle.lock();
                if let Some(store) = handle.as_ref() {
                    return Ok(store.clone());
                }
                let store = self.open()?;
                *handle = Some(store.clone());
                Ok(store)
            }
        }
    }

    fn open(&self) -> Result<Arc<dyn DocumentStore>> {
        match self.connector.connect(&self.address) {
            Ok(store) => {
                info!(address = %self.address, policy = ?self.policy, "connected to store");
                Ok(store)
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "failed to connect to store");
                Err(match e {
                    DriverError::Connection { .. } => e,
                    other => DriverError::connection(&self.address, other),
                })
            }
        }
    }

    fn invalidate(&self, broken: &Arc<dyn DocumentStore>, cause: &DriverError) {
        let mut handle = self.handle.lock();
        let same = handle
            .as_ref()
            .map(|current| Arc::ptr_eq(current, broken))
            .unwrap_or(false);
        if same {
            warn!(address = %self.address, error = %cause, "dropping broken store handle");
            *handle = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryStore};
    use crate::types::CollectionKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts connects, fails while `fail` is set.
    struct CountingConnector {
        inner: MemoryConnector,
        connects: AtomicUsize,
        fail_with: Mutex<Option<DriverError>>,
    }

    impl CountingConnector {
        fn new() -> Self {
            Self {
                inner: MemoryConnector::new(),
                connects: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
            }
        }
    }

    impl Connector for CountingConnector {
        fn connect(&self, address: &str) -> Result<Arc<dyn DocumentStore>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.fail_with.lock().take() {
                return Err(e);
            }
            self.inner.connect(address)
        }
    }

    fn key() -> CollectionKey {
        CollectionKey::new("db", "items")
    }

    #[test]
    fn test_reuse_opens_once() {
        let connector = Arc::new(CountingConnector::new());
        let gateway = ConnectionGateway::new(connector.clone(), "mem", ConnectionPolicy::Reuse);
        assert!(!gateway.is_connected());

        for _ in 0..3 {
            gateway.with_connection(|s| s.find(&key())).unwrap();
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(gateway.is_connected());
    }

    #[test]
    fn test_per_call_opens_every_time() {
        let connector = Arc::new(CountingConnector::new());
        let gateway = ConnectionGateway::new(connector.clone(), "mem", ConnectionPolicy::PerCall);

        for _ in 0..3 {
            gateway.with_connection(|s| s.find(&key())).unwrap();
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert!(!gateway.is_connected());
    }

    #[test]
    fn test_open_failure_is_labeled_and_retried() {
        let connector = Arc::new(CountingConnector::new());
        *connector.fail_with.lock() = Some(DriverError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        let gateway = ConnectionGateway::new(connector.clone(), "mem", ConnectionPolicy::Reuse);

        let err = gateway.check().unwrap_err();
        match err {
            DriverError::Connection { address, cause } => {
                assert_eq!(address, "mem");
                assert!(cause.contains("refused"));
            }
            other => panic!("expected connection error, got {:?}", other),
        }
        assert!(!gateway.is_connected());

        // Not poisoned
        gateway.check().unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_broken_handle_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(MemoryConnector::with_store(store.clone()));
        let gateway = ConnectionGateway::new(connector, "mem", ConnectionPolicy::Reuse);
        gateway.check().unwrap();

        store.set_offline(true);
        assert!(gateway.check().unwrap_err().is_connection());
        assert!(!gateway.is_connected());

        store.set_offline(false);
        gateway.check().unwrap();
        assert!(gateway.is_connected());
    }

    #[test]
    fn test_operation_errors_keep_handle() {
        let connector = Arc::new(CountingConnector::new());
        let gateway = ConnectionGateway::new(connector.clone(), "mem", ConnectionPolicy::Reuse);

        let result: Result<()> =
            gateway.with_connection(|_| Err(DriverError::StoreOperation("nope".into())));
        assert!(result.is_err());
        assert!(gateway.is_connected());

        gateway.disconnect();
        assert!(!gateway.is_connected());
    }
}

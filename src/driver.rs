//! Public entry point: backend selection and collection operations.

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::executor::OperationExecutor;
use crate::gateway::ConnectionGateway;
use crate::store::{Connector, FileConnector, MemoryConnector};
use crate::types::{CollectionKey, Document, OperationResult, Snapshot};
use crate::views::{LiveView, Subscription};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Storage backend identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Directory-backed document store.
    Document,
    /// In-process store for isolated testing.
    Memory,
    /// Known, not implemented.
    MySql,
    /// Known, not implemented.
    PostgreSql,
    /// Caller-supplied connector.
    Custom,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Document => "document",
            Backend::Memory => "memory",
            Backend::MySql => "mysql",
            Backend::PostgreSql => "postgresql",
            Backend::Custom => "custom",
        }
    }

    pub fn is_implemented(&self) -> bool {
        !matches!(self, Backend::MySql | Backend::PostgreSql)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "document" | "file" => Ok(Backend::Document),
            "memory" => Ok(Backend::Memory),
            "mysql" => Ok(Backend::MySql),
            "postgresql" | "postgres" => Ok(Backend::PostgreSql),
            _ => Err(DriverError::BackendNotSupported(s.to_string())),
        }
    }
}

/// Documents to insert: one or many.
#[derive(Clone, Debug)]
pub enum Insert {
    One(Document),
    Many(Vec<Document>),
}

impl From<Document> for Insert {
    fn from(doc: Document) -> Self {
        Insert::One(doc)
    }
}

impl From<Vec<Document>> for Insert {
    fn from(docs: Vec<Document>) -> Self {
        Insert::Many(docs)
    }
}

/// What to delete: one identified document or the whole collection.
#[derive(Clone, Debug)]
pub enum DeleteTarget {
    One(Document),
    All,
}

impl From<Document> for DeleteTarget {
    fn from(doc: Document) -> Self {
        DeleteTarget::One(doc)
    }
}

/// Live access to the collections of one store.
///
/// Owns the connection gateway and the view registry; views live as long
/// as the driver.
pub struct Driver {
    backend: Backend,
    executor: OperationExecutor,
}

impl Driver {
    /// Create a driver for a named backend.
    ///
    /// Unimplemented and unknown backends fail here with
    /// [`DriverError::BackendNotSupported`].
    pub fn new(backend: &str, config: DriverConfig) -> Result<Self> {
        let backend: Backend = backend.parse()?;
        let connector: Arc<dyn Connector> = match backend {
            Backend::Document => Arc::new(FileConnector::new(config.create_if_missing)),
            Backend::Memory => Arc::new(MemoryConnector::new()),
            Backend::MySql | Backend::PostgreSql | Backend::Custom => {
                return Err(DriverError::BackendNotSupported(backend.name().to_string()))
            }
        };
        Self::assemble(backend, connector, config)
    }

    /// Create a driver over a caller-supplied connector.
    pub fn with_connector(connector: Arc<dyn Connector>, config: DriverConfig) -> Result<Self> {
        Self::assemble(Backend::Custom, connector, config)
    }

    fn assemble(
        backend: Backend,
        connector: Arc<dyn Connector>,
        config: DriverConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(backend = %backend, address = %config.address, "created driver");
        let gateway = ConnectionGateway::new(connector, config.address, config.policy);
        Ok(Self {
            backend,
            executor: OperationExecutor::new(gateway, config.auto_register),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Subscribe to a collection. The current snapshot is delivered first.
    pub fn read(&self, key: &CollectionKey) -> Result<Subscription> {
        Ok(self.executor.resolve(key)?.subscribe())
    }

    /// The live view for a collection.
    pub fn view(&self, key: &CollectionKey) -> Result<Arc<LiveView>> {
        self.executor.resolve(key)
    }

    /// Current snapshot of a collection without subscribing.
    pub fn snapshot(&self, key: &CollectionKey) -> Result<Snapshot> {
        Ok(self.executor.resolve(key)?.latest())
    }

    pub fn insert(&self, key: &CollectionKey, docs: impl Into<Insert>) -> Result<OperationResult> {
        match docs.into() {
            Insert::One(doc) => self.executor.insert_one(key, doc),
            Insert::Many(docs) => self.executor.insert_many(key, docs),
        }
    }

    pub fn update(
        &self,
        key: &CollectionKey,
        old_doc: &Document,
        new_doc: &Document,
    ) -> Result<OperationResult> {
        self.executor.update_one(key, old_doc, new_doc)
    }

    pub fn delete(
        &self,
        key: &CollectionKey,
        target: impl Into<DeleteTarget>,
    ) -> Result<OperationResult> {
        match target.into() {
            DeleteTarget::One(doc) => self.executor.delete_one(key, &doc),
            DeleteTarget::All => self.executor.delete_all(key),
        }
    }

    /// Keys of every materialized view, sorted.
    pub fn registered_collections(&self) -> Vec<CollectionKey> {
        self.executor.registry().keys()
    }

    /// Open (or reuse) the store connection and check it responds.
    pub fn check_connection(&self) -> Result<()> {
        self.executor.gateway().check()
    }

    /// Drop the cached store connection; the next operation reconnects.
    pub fn disconnect(&self) {
        self.executor.gateway().disconnect()
    }
}

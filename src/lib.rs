//! # Live Documents
//!
//! Live, continuously-updated views over the collections of a document
//! store. Subscribe to a collection once and receive its current contents
//! immediately, then the full contents again after every mutation.
//!
//! ## Core Concepts
//!
//! - **Driver**: entry point, selects the backend and owns everything else
//! - **Live views**: one per collection, replaying the latest snapshot
//! - **Executor**: serializes write → re-read → publish per collection
//! - **Gateway**: owns the store connection, reopens it after failures
//!
//! ## Example
//!
//! ```ignore
//! use livedoc::{CollectionKey, Document, Driver, DriverConfig};
//! use serde_json::json;
//!
//! let driver = Driver::new("document", DriverConfig::new("./my-store"))?;
//! let key = CollectionKey::new("words", "dutch");
//!
//! let subscription = driver.read(&key)?;
//! let current = subscription.recv()?;
//!
//! driver.insert(&key, Document::from_value(json!({
//!     "chapter": 1, "name": "allemaal", "translation": "all"
//! }))?)?;
//! let updated = subscription.recv()?;
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod store;
pub mod types;
pub mod views;

// Re-exports
pub use config::{ConnectionPolicy, DriverConfig};
pub use driver::{Backend, DeleteTarget, Driver, Insert};
pub use error::{DriverError, Result};
pub use executor::OperationExecutor;
pub use gateway::ConnectionGateway;
pub use store::{
    Connector, DocumentStore, FileConnector, FileStore, MemoryConnector, MemoryStore,
};
pub use types::*;
pub use views::{LiveView, Subscription, SubscriptionId, ViewRegistry};

//! Error types for the live-collection driver.

use crate::types::CollectionKey;
use thiserror::Error;

/// Main error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The store handle could not be opened, or broke while in use.
    #[error("Connection error ({address}): {cause}")]
    Connection { address: String, cause: String },

    /// The store acknowledged fewer inserted documents than were submitted.
    #[error("Partial write: expected {expected} documents, store reported {actual}")]
    PartialWrite { expected: usize, actual: usize },

    #[error("Store rejected operation: {0}")]
    StoreOperation(String),

    #[error("Backend not supported: {0}")]
    BackendNotSupported(String),

    #[error("Collection not registered: {0}")]
    UnregisteredCollection(CollectionKey),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DriverError {
    /// Build a connection error from any displayable cause.
    pub fn connection(address: impl Into<String>, cause: impl ToString) -> Self {
        DriverError::Connection {
            address: address.into(),
            cause: cause.to_string(),
        }
    }

    /// True for failures that mean the store handle is no longer usable.
    pub fn is_connection(&self) -> bool {
        matches!(self, DriverError::Connection { .. })
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Serialization(e.to_string())
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

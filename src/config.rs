//! Driver configuration.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the connection gateway manages the store handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Open lazily once, reuse until the handle breaks.
    #[default]
    Reuse,
    /// Open a fresh handle for every operation and drop it afterwards.
    PerCall,
}

/// Driver configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Store address. For the document backend this is a directory path,
    /// optionally prefixed with `file://`.
    pub address: String,

    /// Connection reuse policy.
    pub policy: ConnectionPolicy,

    /// Whether connecting creates the store root if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether a mutation may touch a collection never opened through `read`.
    /// When false such mutations fail with `UnregisteredCollection`.
    pub auto_register: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: "./store".to_string(),
            policy: ConnectionPolicy::Reuse,
            create_if_missing: true,
            auto_register: true,
        }
    }
}

impl DriverConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.auto_register = auto_register;
        self
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: DriverConfig = serde_json::from_str(text)
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(DriverError::InvalidConfig("address is empty".to_string()));
        }
        Ok(())
    }
}

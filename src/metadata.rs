//! Metadata service boundary: the device inventory keyed by identity.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::applier::ConfigFragment;
use crate::device::DeviceIdentity;

/// One device as described by the metadata service
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub identity: DeviceIdentity,
    pub fragment: ConfigFragment,
}

/// Read-only snapshot of the inventory, taken for one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInventory {
    devices: HashMap<DeviceIdentity, ConfigFragment>,
}

impl DeviceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, identity: DeviceIdentity, fragment: ConfigFragment) -> Self {
        self.devices.insert(identity, fragment);
        self
    }

    pub fn lookup(&self, identity: &DeviceIdentity) -> Option<DeviceRecord> {
        self.devices.get(identity).map(|fragment| DeviceRecord {
            identity: identity.clone(),
            fragment: fragment.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl FromIterator<(DeviceIdentity, ConfigFragment)> for DeviceInventory {
    fn from_iter<I: IntoIterator<Item = (DeviceIdentity, ConfigFragment)>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Worth retrying: the source may be briefly unavailable
    #[error("metadata temporarily unavailable: {0}")]
    Transient(String),

    /// Retrying will not help
    #[error("metadata unusable: {0}")]
    Permanent(String),

    #[error("metadata request timed out after {0:?}")]
    Timeout(Duration),
}

impl MetadataError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MetadataError::Transient(_) | MetadataError::Timeout(_))
    }
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Refresh and return the current inventory
    async fn inventory(&self) -> Result<DeviceInventory, MetadataError>;
}

/// Inventory published by the metadata agent as a JSON object of
/// `identity -> fragment`.
#[derive(Debug, Clone)]
pub struct FileMetadataClient {
    path: PathBuf,
}

impl FileMetadataClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetadataClient for FileMetadataClient {
    async fn inventory(&self) -> Result<DeviceInventory, MetadataError> {
        let content = tokio::fs::read(&self.path).await.map_err(|e| {
            let what = match e.kind() {
                io::ErrorKind::NotFound => "not published yet".to_string(),
                _ => e.to_string(),
            };
            MetadataError::Transient(format!("{}: {}", self.path.display(), what))
        })?;

        let raw: HashMap<String, serde_json::Value> = serde_json::from_slice(&content)
            .map_err(|e| MetadataError::Permanent(format!("{}: {}", self.path.display(), e)))?;

        let inventory: DeviceInventory = raw
            .into_iter()
            .map(|(identity, fragment)| (DeviceIdentity::new(identity), ConfigFragment::new(fragment)))
            .collect();

        debug!(devices = inventory.len(), "Loaded device inventory");
        Ok(inventory)
    }
}

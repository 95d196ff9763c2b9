//! Live device identity lookup.

use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identity of a device, the hardware address for network interfaces.
///
/// Normalised to lowercase so sysfs and metadata spellings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device {devpath} is not present")]
    NotPresent { devpath: String },

    #[error("device {devpath} reports an empty identity")]
    EmptyIdentity { devpath: String },

    #[error("failed to read identity of {devpath}: {source}")]
    Io {
        devpath: String,
        #[source]
        source: io::Error,
    },
}

/// Reads a device's identity from the live system
#[async_trait]
pub trait DeviceIdentityReader: Send + Sync {
    async fn identity(&self, devpath: &str) -> Result<DeviceIdentity, DeviceError>;
}

/// Reads `<sysfs_root><devpath>/address`
#[derive(Debug, Clone)]
pub struct SysfsIdentityReader {
    sysfs_root: PathBuf,
}

impl SysfsIdentityReader {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    fn address_path(&self, devpath: &str) -> PathBuf {
        self.sysfs_root
            .join(devpath.trim_start_matches('/'))
            .join("address")
    }
}

#[async_trait]
impl DeviceIdentityReader for SysfsIdentityReader {
    async fn identity(&self, devpath: &str) -> Result<DeviceIdentity, DeviceError> {
        let path = self.address_path(devpath);

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => DeviceError::NotPresent {
                    devpath: devpath.to_string(),
                },
                _ => DeviceError::Io {
                    devpath: devpath.to_string(),
                    source,
                },
            })?;

        let identity = DeviceIdentity::new(raw);
        if identity.as_str().is_empty() {
            return Err(DeviceError::EmptyIdentity {
                devpath: devpath.to_string(),
            });
        }
        Ok(identity)
    }
}

//! Boundary to whatever renders configuration onto the host.
//!
//! The handler only relies on the `ConfigApplier` contract: apply and remove
//! are idempotent and report the fragment that was in effect before the call.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::device::DeviceIdentity;

/// Desired configuration for one device, opaque to the handler beyond equality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFragment(serde_json::Value);

impl ConfigFragment {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for ConfigFragment {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("invalid fragment for {identity}: {reason}")]
    InvalidFragment {
        identity: DeviceIdentity,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stored fragment {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("post-apply command {program} failed: {status}")]
    Command { program: String, status: String },
}

/// A fragment as put in effect for one device, with the kernel path the
/// device had at the time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedConfig {
    pub devpath: String,
    pub fragment: ConfigFragment,
}

impl AppliedConfig {
    pub fn new(devpath: impl Into<String>, fragment: ConfigFragment) -> Self {
        Self {
            devpath: devpath.into(),
            fragment,
        }
    }
}

#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Configuration currently in effect for the device, if any
    async fn current(&self, identity: &DeviceIdentity)
        -> Result<Option<AppliedConfig>, ApplyError>;

    /// Device whose configuration was applied under `devpath`.
    ///
    /// Survives restarts of the handler; a removed device can no longer be
    /// read from sysfs.
    async fn identity_for(&self, devpath: &str) -> Result<Option<DeviceIdentity>, ApplyError>;

    /// Put `applied` in effect; returns the previous configuration
    async fn apply(
        &self,
        identity: &DeviceIdentity,
        applied: &AppliedConfig,
    ) -> Result<Option<AppliedConfig>, ApplyError>;

    /// Drop the device's configuration; returns what was removed
    async fn remove(&self, identity: &DeviceIdentity)
        -> Result<Option<AppliedConfig>, ApplyError>;
}

/// On-disk form of one applied device
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    identity: DeviceIdentity,
    #[serde(flatten)]
    applied: AppliedConfig,
}

/// Keeps one JSON record per device under a state directory and optionally
/// runs a command after each change so the host re-renders its network
/// configuration.
#[derive(Debug, Clone)]
pub struct FragmentDirApplier {
    state_dir: PathBuf,
    post_apply_command: Option<Vec<String>>,
}

impl FragmentDirApplier {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            post_apply_command: None,
        }
    }

    /// Command (argv) to run after a fragment is written or removed
    pub fn with_post_apply_command(mut self, argv: Vec<String>) -> Self {
        self.post_apply_command = if argv.is_empty() { None } else { Some(argv) };
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn record_path(&self, identity: &DeviceIdentity) -> PathBuf {
        let name: String = identity
            .as_str()
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | ':' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        self.state_dir.join(format!("{name}.json"))
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredRecord>, ApplyError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| ApplyError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn write(&self, path: &Path, record: &StoredRecord) -> Result<(), ApplyError> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| io_error(&self.state_dir, e))?;

        let content = serde_json::to_vec_pretty(record).map_err(|source| ApplyError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn delete(&self, path: &Path) -> Result<(), ApplyError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Put the previous state back after a failed post-apply command
    async fn restore(&self, path: &Path, previous: Option<&StoredRecord>) {
        let result = match previous {
            Some(record) => self.write(path, record).await,
            None => self.delete(path).await,
        };
        if let Err(e) = result {
            warn!("Failed to roll back {}: {}", path.display(), e);
        }
    }

    async fn run_post_apply(
        &self,
        identity: &DeviceIdentity,
        devpath: &str,
        operation: &str,
    ) -> Result<(), ApplyError> {
        let Some(argv) = &self.post_apply_command else {
            return Ok(());
        };
        let program = argv[0].clone();

        debug!(program = %program, device = %identity, operation, "Running post-apply command");

        let status = Command::new(&program)
            .args(&argv[1..])
            .env("HOTPLUG_DEVICE", identity.as_str())
            .env("HOTPLUG_DEVPATH", devpath)
            .env("HOTPLUG_OPERATION", operation)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| ApplyError::Command {
                program: program.clone(),
                status: e.to_string(),
            })?;

        if !status.success() {
            return Err(ApplyError::Command {
                program,
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

fn io_error(path: &Path, source: io::Error) -> ApplyError {
    ApplyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ConfigApplier for FragmentDirApplier {
    async fn current(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        let record = self.read(&self.record_path(identity)).await?;
        Ok(record.map(|record| record.applied))
    }

    async fn identity_for(&self, devpath: &str) -> Result<Option<DeviceIdentity>, ApplyError> {
        let mut entries = match tokio::fs::read_dir(&self.state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.state_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.state_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(record)) if record.applied.devpath == devpath => {
                    return Ok(Some(record.identity))
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring unreadable applied record: {}", e),
            }
        }
        Ok(None)
    }

    async fn apply(
        &self,
        identity: &DeviceIdentity,
        applied: &AppliedConfig,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        if !applied.fragment.value().is_object() {
            return Err(ApplyError::InvalidFragment {
                identity: identity.clone(),
                reason: "fragment must be a JSON object".to_string(),
            });
        }

        let path = self.record_path(identity);
        let previous = self.read(&path).await?;
        if previous.as_ref().map(|record| &record.applied) == Some(applied) {
            return Ok(Some(applied.clone()));
        }

        let record = StoredRecord {
            identity: identity.clone(),
            applied: applied.clone(),
        };
        self.write(&path, &record).await?;
        if let Err(e) = self.run_post_apply(identity, &applied.devpath, "apply").await {
            self.restore(&path, previous.as_ref()).await;
            return Err(e);
        }

        info!(device = %identity, devpath = %applied.devpath, "Applied configuration fragment");
        Ok(previous.map(|record| record.applied))
    }

    async fn remove(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        let path = self.record_path(identity);
        let Some(previous) = self.read(&path).await? else {
            return Ok(None);
        };

        self.delete(&path).await?;
        if let Err(e) = self
            .run_post_apply(identity, &previous.applied.devpath, "remove")
            .await
        {
            self.restore(&path, Some(&previous)).await;
            return Err(e);
        }

        info!(device = %identity, "Removed configuration fragment");
        Ok(Some(previous.applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const DEVPATH: &str = "/devices/pci0000:00/net/eth1";

    fn mac() -> DeviceIdentity {
        DeviceIdentity::new("52:54:00:ab:cd:ef")
    }

    fn applied(value: serde_json::Value) -> AppliedConfig {
        AppliedConfig::new(DEVPATH, ConfigFragment::new(value))
    }

    #[tokio::test]
    async fn test_apply_reports_previous() {
        let dir = tempdir().unwrap();
        let applier = FragmentDirApplier::new(dir.path());
        let v1 = applied(json!({"dhcp4": true}));
        let v2 = applied(json!({"dhcp4": false}));

        assert_eq!(applier.current(&mac()).await.unwrap(), None);
        assert_eq!(applier.apply(&mac(), &v1).await.unwrap(), None);
        assert_eq!(applier.current(&mac()).await.unwrap(), Some(v1.clone()));
        assert_eq!(applier.apply(&mac(), &v2).await.unwrap(), Some(v1));
        assert_eq!(applier.current(&mac()).await.unwrap(), Some(v2));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let applier = FragmentDirApplier::new(dir.path());
        let config = applied(json!({"dhcp4": true}));

        applier.apply(&mac(), &config).await.unwrap();
        assert_eq!(applier.remove(&mac()).await.unwrap(), Some(config));
        assert_eq!(applier.remove(&mac()).await.unwrap(), None);
        assert_eq!(applier.current(&mac()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_devpath_binding_survives_new_instance() {
        let dir = tempdir().unwrap();
        FragmentDirApplier::new(dir.path())
            .apply(&mac(), &applied(json!({"dhcp4": true})))
            .await
            .unwrap();

        let reopened = FragmentDirApplier::new(dir.path());
        assert_eq!(reopened.identity_for(DEVPATH).await.unwrap(), Some(mac()));
        assert_eq!(reopened.identity_for("/devices/net/other0").await.unwrap(), None);

        reopened.remove(&mac()).await.unwrap();
        assert_eq!(reopened.identity_for(DEVPATH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identity_for_without_state_dir() {
        let dir = tempdir().unwrap();
        let applier = FragmentDirApplier::new(dir.path().join("absent"));
        assert_eq!(applier.identity_for(DEVPATH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_non_object_fragment() {
        let dir = tempdir().unwrap();
        let applier = FragmentDirApplier::new(dir.path());

        let err = applier
            .apply(&mac(), &applied(json!("eth0")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::InvalidFragment { .. }));
    }

    #[tokio::test]
    async fn test_failed_command_rolls_back() {
        let dir = tempdir().unwrap();
        let applier = FragmentDirApplier::new(dir.path())
            .with_post_apply_command(vec!["false".to_string()]);

        let err = applier
            .apply(&mac(), &applied(json!({"dhcp4": true})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Command { .. }));
        assert_eq!(applier.current(&mac()).await.unwrap(), None);
        assert_eq!(applier.identity_for(DEVPATH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_post_apply_command_runs() {
        let dir = tempdir().unwrap();
        let applier = FragmentDirApplier::new(dir.path())
            .with_post_apply_command(vec!["true".to_string()]);
        let config = applied(json!({"dhcp4": true}));

        applier.apply(&mac(), &config).await.unwrap();
        assert_eq!(applier.current(&mac()).await.unwrap(), Some(config));
    }

    #[test]
    fn test_record_path_is_sanitised() {
        let applier = FragmentDirApplier::new("/state");
        let path = applier.record_path(&DeviceIdentity::new("../etc/passwd"));
        assert_eq!(path, PathBuf::from("/state/.._etc_passwd.json"));
    }
}

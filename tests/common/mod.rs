// Common fakes for handler integration tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hotplugd::applier::{AppliedConfig, ApplyError, ConfigApplier, ConfigFragment};
use hotplugd::device::{DeviceError, DeviceIdentity, DeviceIdentityReader};
use hotplugd::handler::{
    CorrelationSettings, HandlerSettings, HotplugHandler, MemoryResultLog,
};
use hotplugd::metadata::{DeviceInventory, MetadataClient, MetadataError};
use hotplugd::retry::{BackoffConfig, RetryPolicy};

/// Inventory that tests can change while the handler runs
#[derive(Default)]
pub struct FakeMetadata {
    inventory: Mutex<DeviceInventory>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeMetadata {
    pub fn with_device(identity: &str, fragment: serde_json::Value) -> Self {
        let fake = Self::default();
        fake.publish(identity, fragment);
        fake
    }

    pub fn publish(&self, identity: &str, fragment: serde_json::Value) {
        let mut inventory = self.inventory.lock().unwrap();
        *inventory = inventory
            .clone()
            .with_device(DeviceIdentity::new(identity), ConfigFragment::new(fragment));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn inventory(&self) -> Result<DeviceInventory, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inventory.lock().unwrap().clone())
    }
}

/// Metadata source that is never reachable
#[derive(Default)]
pub struct UnreachableMetadata {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl UnreachableMetadata {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataClient for UnreachableMetadata {
    async fn inventory(&self) -> Result<DeviceInventory, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MetadataError::Transient("connection refused".to_string()))
    }
}

/// In-memory applier counting mutating calls
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<HashMap<DeviceIdentity, AppliedConfig>>,
    apply_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    /// Applies left to reject before succeeding
    failures: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingApplier {
    /// Rejects the first `failures` applies
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn applied(&self, identity: &str) -> Option<AppliedConfig> {
        self.applied
            .lock()
            .unwrap()
            .get(&DeviceIdentity::new(identity))
            .cloned()
    }
}

#[async_trait]
impl ConfigApplier for RecordingApplier {
    async fn current(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        Ok(self.applied.lock().unwrap().get(identity).cloned())
    }

    async fn identity_for(&self, devpath: &str) -> Result<Option<DeviceIdentity>, ApplyError> {
        Ok(self
            .applied
            .lock()
            .unwrap()
            .iter()
            .find(|(_, applied)| applied.devpath == devpath)
            .map(|(identity, _)| identity.clone()))
    }

    async fn apply(
        &self,
        identity: &DeviceIdentity,
        applied: &AppliedConfig,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ApplyError::Command {
                program: "netplan".to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(self
            .applied
            .lock()
            .unwrap()
            .insert(identity.clone(), applied.clone()))
    }

    async fn remove(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.applied.lock().unwrap().remove(identity))
    }
}

/// Applier whose calls never complete
pub struct HungApplier;

#[async_trait]
impl ConfigApplier for HungApplier {
    async fn current(&self, _: &DeviceIdentity) -> Result<Option<AppliedConfig>, ApplyError> {
        std::future::pending().await
    }

    async fn identity_for(&self, _: &str) -> Result<Option<DeviceIdentity>, ApplyError> {
        std::future::pending().await
    }

    async fn apply(
        &self,
        _: &DeviceIdentity,
        _: &AppliedConfig,
    ) -> Result<Option<AppliedConfig>, ApplyError> {
        std::future::pending().await
    }

    async fn remove(&self, _: &DeviceIdentity) -> Result<Option<AppliedConfig>, ApplyError> {
        std::future::pending().await
    }
}

/// devpath -> identity table standing in for sysfs
#[derive(Default)]
pub struct FakeDevices {
    present: Mutex<HashMap<String, DeviceIdentity>>,
}

#[allow(dead_code)]
impl FakeDevices {
    pub fn with_device(devpath: &str, identity: &str) -> Self {
        let fake = Self::default();
        fake.plug(devpath, identity);
        fake
    }

    pub fn plug(&self, devpath: &str, identity: &str) {
        self.present
            .lock()
            .unwrap()
            .insert(devpath.to_string(), DeviceIdentity::new(identity));
    }

    pub fn unplug(&self, devpath: &str) {
        self.present.lock().unwrap().remove(devpath);
    }
}

#[async_trait]
impl DeviceIdentityReader for FakeDevices {
    async fn identity(&self, devpath: &str) -> Result<DeviceIdentity, DeviceError> {
        self.present
            .lock()
            .unwrap()
            .get(devpath)
            .cloned()
            .ok_or_else(|| DeviceError::NotPresent {
                devpath: devpath.to_string(),
            })
    }
}

pub fn settings() -> HandlerSettings {
    HandlerSettings {
        supported_subsystems: vec!["net".to_string()],
        correlation: CorrelationSettings {
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: BackoffConfig::Fixed {
                    delay: Duration::from_secs(1),
                },
            },
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        },
        applier_timeout: Duration::from_secs(10),
        device_timeout: Duration::from_secs(2),
    }
}

#[allow(dead_code)]
pub fn handler(
    metadata: Arc<dyn MetadataClient>,
    applier: Arc<dyn ConfigApplier>,
    devices: Arc<dyn DeviceIdentityReader>,
    results: Arc<MemoryResultLog>,
) -> HotplugHandler {
    HotplugHandler::new(settings(), metadata, applier, devices, results)
}

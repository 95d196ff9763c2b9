//! Recovery of devices whose events were dropped before the daemon was ready.
//!
//! The hook discards events while the handler is not accepting them. With
//! `RescanOnStart` the daemon walks the network class in sysfs once at
//! startup and feeds a synthesized `add` for every physical interface through
//! the normal pipeline. Applying is idempotent, so already configured devices
//! come out as `applied` without any change.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::handler::{HotplugHandler, ProcessingStatus};
use crate::protocol::{HotplugAction, HotplugEvent};

const VIRTUAL_DEVICES: &str = "/devices/virtual/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationPolicy {
    /// Events dropped while not ready stay lost
    #[default]
    Disabled,
    /// Re-scan present devices before draining the channel
    RescanOnStart,
}

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Synthesized `add` events for the physical network devices under `sysfs_root`
pub async fn scan_network_devices(sysfs_root: &Path) -> io::Result<Vec<HotplugEvent>> {
    let root = tokio::fs::canonicalize(sysfs_root).await?;
    let class_dir = root.join("class").join("net");

    let mut entries = match tokio::fs::read_dir(&class_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut devpaths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let target = match tokio::fs::canonicalize(entry.path()).await {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot resolve {}: {}", entry.path().display(), e);
                continue;
            }
        };

        match devpath_under(&root, &target) {
            Some(devpath) if devpath.starts_with(VIRTUAL_DEVICES) => {
                debug!(devpath = %devpath, "Ignoring virtual device");
            }
            Some(devpath) => devpaths.push(devpath),
            None => warn!("{} resolves outside sysfs", entry.path().display()),
        }
    }
    devpaths.sort();

    let mut events = Vec::with_capacity(devpaths.len());
    for devpath in devpaths {
        match HotplugEvent::new("net", devpath, HotplugAction::Add) {
            Ok(event) => events.push(event),
            Err(e) => warn!("Skipping unusable device path: {}", e),
        }
    }
    Ok(events)
}

fn devpath_under(root: &Path, target: &Path) -> Option<String> {
    let relative = target.strip_prefix(root).ok()?.to_str()?;
    Some(format!("/{relative}"))
}

/// Run the startup pass the policy asks for
pub async fn reconcile(
    policy: ReconciliationPolicy,
    sysfs_root: &Path,
    handler: &mut HotplugHandler,
) -> io::Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    if policy == ReconciliationPolicy::Disabled {
        return Ok(summary);
    }

    let events = scan_network_devices(sysfs_root).await?;
    info!(devices = events.len(), "Reconciling present network devices");

    for event in events {
        summary.scanned += 1;
        match handler.process_line(event.to_wire()).await {
            Ok(result) => match result.status {
                ProcessingStatus::Applied => summary.applied += 1,
                ProcessingStatus::Failed => summary.failed += 1,
                _ => summary.skipped += 1,
            },
            Err(e) => {
                warn!("Reconciliation bookkeeping error: {}", e);
                summary.failed += 1;
            }
        }
    }

    info!(
        scanned = summary.scanned,
        applied = summary.applied,
        failed = summary.failed,
        skipped = summary.skipped,
        "Reconciliation finished"
    );
    Ok(summary)
}

//! The resident hotplug handler.
//!
//! A single sequential consumer: one event is fully processed before the next
//! line is read, so the host's network configuration has exactly one mutator
//! and needs no locking. Every failure is local to its event; nothing short of
//! a shutdown request stops the loop.

pub mod correlate;
pub mod entry;
pub mod result;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::applier::{AppliedConfig, ConfigApplier};
use crate::channel::{ChannelError, EventSource};
use crate::device::{DeviceIdentity, DeviceIdentityReader};
use crate::metadata::MetadataClient;
use crate::protocol::{parse_line, HotplugAction, HotplugEvent};

pub use correlate::{correlate, fetch_inventory, Correlation, CorrelationSettings};
pub use entry::{Outcome, ProcessingStatus, QueueEntry, TransitionError};
pub use result::{MemoryResultLog, ResultLogEntry, ResultSink};

/// Pause after a channel error that is not tied to a single line
const CHANNEL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Runtime settings for the handler
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Subsystems the handler acts on; others are skipped
    pub supported_subsystems: Vec<String>,
    /// Metadata lookup and correlation timing
    pub correlation: CorrelationSettings,
    /// Bound on each applier call
    pub applier_timeout: Duration,
    /// Bound on reading a device's identity
    pub device_timeout: Duration,
}

impl HandlerSettings {
    pub fn supports(&self, subsystem: &str) -> bool {
        self.supported_subsystems.iter().any(|s| s == subsystem)
    }
}

/// Counters kept for the lifetime of the handler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// Lines taken off the channel, unreadable ones included
    pub received: u64,
    pub applied: u64,
    /// Applied without an applier call because the configuration was already in effect
    pub unchanged: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl HandlerStats {
    fn record(&mut self, status: ProcessingStatus) {
        match status {
            ProcessingStatus::Applied => self.applied += 1,
            ProcessingStatus::Failed => self.failed += 1,
            ProcessingStatus::Skipped => self.skipped += 1,
            ProcessingStatus::Pending | ProcessingStatus::InProgress => {}
        }
    }
}

impl fmt::Display for HandlerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} applied={} (unchanged={}) failed={} skipped={}",
            self.received, self.applied, self.unchanged, self.failed, self.skipped
        )
    }
}

pub struct HotplugHandler {
    settings: HandlerSettings,
    metadata: Arc<dyn MetadataClient>,
    applier: Arc<dyn ConfigApplier>,
    devices: Arc<dyn DeviceIdentityReader>,
    results: Arc<dyn ResultSink>,
    stats: HandlerStats,
}

impl HotplugHandler {
    pub fn new(
        settings: HandlerSettings,
        metadata: Arc<dyn MetadataClient>,
        applier: Arc<dyn ConfigApplier>,
        devices: Arc<dyn DeviceIdentityReader>,
        results: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            settings,
            metadata,
            applier,
            devices,
            results,
            stats: HandlerStats::default(),
        }
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    /// Drain `source` until it closes or `shutdown` turns true.
    ///
    /// Shutdown is only observed while waiting for the next line; an event in
    /// progress always runs to completion.
    pub async fn run(
        &mut self,
        source: &mut dyn EventSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> HandlerStats {
        info!("Hotplug handler waiting for events");
        let mut watching = true;

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping hotplug handler");
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() {
                        // Sender gone; nobody can ask us to stop any more
                        watching = false;
                    }
                    continue;
                }
                next = source.next_line() => next,
            };

            match next {
                Ok(Some(line)) => {
                    if let Err(e) = self.process_line(line).await {
                        error!("Hotplug entry bookkeeping error: {}", e);
                    }
                }
                Ok(None) => {
                    info!("Event channel closed");
                    break;
                }
                Err(e) if e.is_line_local() => self.reject_unreadable(&e),
                Err(e) => {
                    error!("Event channel error: {}", e);
                    sleep(CHANNEL_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Hotplug handler stopped: {}", self.stats);
        self.stats.clone()
    }

    /// Take one line through `Pending -> InProgress -> terminal`, log the
    /// result and drop the entry.
    pub async fn process_line(
        &mut self,
        line: impl Into<String>,
    ) -> Result<ResultLogEntry, TransitionError> {
        let mut entry = QueueEntry::new(line);
        self.stats.received += 1;
        entry.begin()?;

        let outcome = match parse_line(entry.raw()) {
            Ok(event) => {
                entry.attach(event.clone());
                self.handle_event(&event).await
            }
            Err(e) => Outcome::failed(format!("malformed event: {e}")),
        };

        if outcome == (Outcome::Applied { changed: false }) {
            self.stats.unchanged += 1;
        }

        let result = entry.finish(outcome)?;
        self.record(&result);
        Ok(result)
    }

    fn reject_unreadable(&mut self, error: &ChannelError) {
        self.stats.received += 1;
        let mut entry = QueueEntry::new("<unreadable>");
        let result = entry
            .begin()
            .and_then(|_| entry.finish(Outcome::failed(format!("malformed event: {error}"))));
        match result {
            Ok(result) => self.record(&result),
            Err(e) => error!("Hotplug entry bookkeeping error: {}", e),
        }
    }

    fn record(&mut self, result: &ResultLogEntry) {
        self.stats.record(result.status);

        match result.status {
            ProcessingStatus::Failed => warn!(
                status = %result.status,
                reason = result.reason.as_deref().unwrap_or(""),
                "{}",
                result.line
            ),
            _ => info!(
                status = %result.status,
                reason = result.reason.as_deref().unwrap_or(""),
                "{}",
                result.line
            ),
        }

        if let Err(e) = self.results.append(result) {
            warn!("Failed to append hotplug result: {}", e);
        }
    }

    async fn handle_event(&self, event: &HotplugEvent) -> Outcome {
        if !self.settings.supports(&event.subsystem) {
            return Outcome::skipped(format!("unsupported subsystem {}", event.subsystem));
        }

        match event.action {
            HotplugAction::Add => self.handle_add(event).await,
            HotplugAction::Remove => self.handle_remove(event).await,
            HotplugAction::Change => Outcome::skipped("no handling for change events"),
        }
    }

    async fn handle_add(&self, event: &HotplugEvent) -> Outcome {
        let identity = match self.read_identity(&event.devpath).await {
            Ok(identity) => identity,
            Err(reason) => return Outcome::failed(format!("cannot read device identity: {reason}")),
        };

        let record = match correlate(
            self.metadata.as_ref(),
            &identity,
            &self.settings.correlation,
        )
        .await
        {
            Ok(Correlation::Matched(record)) => record,
            Ok(Correlation::NotFound { waited, lookups }) => {
                debug!(device = %identity, ?waited, lookups, "Giving up on correlation");
                return Outcome::skipped("device not found");
            }
            Err(e) => return Outcome::failed(format!("metadata fetch failed: {e}")),
        };

        let desired = AppliedConfig::new(event.devpath.clone(), record.fragment);
        let current = match self
            .bounded("query", self.applier.current(&identity))
            .await
        {
            Ok(current) => current,
            Err(reason) => return Outcome::failed(reason),
        };

        // No ledger guarantees each event is seen once, so skip redundant applies
        if current.as_ref() == Some(&desired) {
            debug!(device = %identity, "Configuration already in effect");
            return Outcome::Applied { changed: false };
        }

        match self
            .bounded("apply", self.applier.apply(&identity, &desired))
            .await
        {
            Ok(_previous) => Outcome::Applied { changed: true },
            Err(reason) => Outcome::failed(reason),
        }
    }

    /// The device is usually gone from sysfs by now, so the applier's record
    /// of what was applied under this devpath comes first.
    async fn handle_remove(&self, event: &HotplugEvent) -> Outcome {
        let bound = match self
            .bounded("lookup", self.applier.identity_for(&event.devpath))
            .await
        {
            Ok(bound) => bound,
            Err(reason) => return Outcome::failed(reason),
        };
        let identity = match bound {
            Some(identity) => identity,
            None => match self.read_identity(&event.devpath).await {
                Ok(identity) => identity,
                Err(_) => return Outcome::skipped("device was not configured"),
            },
        };

        match self
            .bounded("query", self.applier.current(&identity))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return Outcome::skipped("device was not configured"),
            Err(reason) => return Outcome::failed(reason),
        }

        match self.bounded("remove", self.applier.remove(&identity)).await {
            Ok(_removed) => Outcome::Applied { changed: true },
            Err(reason) => Outcome::failed(reason),
        }
    }

    async fn read_identity(&self, devpath: &str) -> Result<DeviceIdentity, String> {
        match timeout(self.settings.device_timeout, self.devices.identity(devpath)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.settings.device_timeout)),
        }
    }

    /// Run one applier call under the applier timeout
    async fn bounded<T, E, F>(&self, operation: &str, call: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match timeout(self.settings.applier_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{operation} failed: {e}")),
            Err(_) => Err(format!(
                "{operation} timed out after {:?}",
                self.settings.applier_timeout
            )),
        }
    }
}

//! Matching a live device against the metadata inventory.
//!
//! Metadata can lag the hardware event, so an unmatched device is looked up
//! again every poll interval until the correlation timeout runs out. Each
//! lookup is itself a bounded, retried metadata fetch.

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::device::DeviceIdentity;
use crate::metadata::{DeviceInventory, DeviceRecord, MetadataClient, MetadataError};
use crate::retry::RetryPolicy;

/// Timing knobs for correlation
#[derive(Debug, Clone)]
pub struct CorrelationSettings {
    /// Bound on a single metadata request
    pub request_timeout: Duration,
    /// Retries for transient metadata failures
    pub retry: RetryPolicy,
    /// How long to keep looking for an unmatched device
    pub timeout: Duration,
    /// Pause between lookups of an unmatched device
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    Matched(DeviceRecord),
    NotFound { waited: Duration, lookups: u32 },
}

/// One inventory refresh, retried with backoff on transient failure
pub async fn fetch_inventory(
    client: &dyn MetadataClient,
    settings: &CorrelationSettings,
) -> Result<DeviceInventory, MetadataError> {
    let mut attempt = 1;
    loop {
        let result = match timeout(settings.request_timeout, client.inventory()).await {
            Ok(result) => result,
            Err(_) => Err(MetadataError::Timeout(settings.request_timeout)),
        };

        match result {
            Ok(inventory) => return Ok(inventory),
            Err(e) if e.is_transient() => match settings.retry.delay_after(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        max_attempts = settings.retry.max_attempts,
                        "Metadata fetch failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Look `identity` up until it appears or the correlation timeout elapses
pub async fn correlate(
    client: &dyn MetadataClient,
    identity: &DeviceIdentity,
    settings: &CorrelationSettings,
) -> Result<Correlation, MetadataError> {
    let started = Instant::now();
    let mut lookups = 0;

    loop {
        let inventory = fetch_inventory(client, settings).await?;
        lookups += 1;

        if let Some(record) = inventory.lookup(identity) {
            debug!(device = %identity, lookups, "Correlated device with metadata");
            return Ok(Correlation::Matched(record));
        }

        let waited = started.elapsed();
        if waited + settings.poll_interval > settings.timeout {
            return Ok(Correlation::NotFound { waited, lookups });
        }

        debug!(
            device = %identity,
            known = inventory.len(),
            "Device not in metadata yet, looking again in {:?}",
            settings.poll_interval
        );
        sleep(settings.poll_interval).await;
    }
}

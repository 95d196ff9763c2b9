use std::fmt;
use std::io;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{Outcome, ProcessingStatus};
use crate::activity_log::ActivityLog;
use crate::protocol::{HotplugAction, HotplugEvent};

/// Immutable record of how one event ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultLogEntry {
    /// When processing ended
    pub timestamp: DateTime<Utc>,
    /// When the line was taken off the channel
    pub dequeued_at: DateTime<Utc>,
    /// The channel line exactly as read
    pub line: String,
    pub subsystem: Option<String>,
    pub devpath: Option<String>,
    pub action: Option<HotplugAction>,
    pub status: ProcessingStatus,
    pub reason: Option<String>,
}

impl ResultLogEntry {
    pub(crate) fn new(
        line: String,
        event: Option<HotplugEvent>,
        dequeued_at: DateTime<Utc>,
        outcome: &Outcome,
    ) -> Self {
        let (subsystem, devpath, action) = match event {
            Some(event) => (Some(event.subsystem), Some(event.devpath), Some(event.action)),
            None => (None, None, None),
        };

        Self {
            timestamp: Utc::now(),
            dequeued_at,
            line,
            subsystem,
            devpath,
            action,
            status: outcome.status(),
            reason: outcome.reason().map(str::to_string),
        }
    }
}

impl fmt::Display for ResultLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hotplug result: {} => {}", self.line, self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Append-only destination for result records
pub trait ResultSink: Send + Sync {
    fn append(&self, entry: &ResultLogEntry) -> io::Result<()>;
}

impl ResultSink for ActivityLog {
    fn append(&self, entry: &ResultLogEntry) -> io::Result<()> {
        self.record(&entry.to_string())
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryResultLog {
    entries: Mutex<Vec<ResultLogEntry>>,
}

impl MemoryResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ResultLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl ResultSink for MemoryResultLog {
    fn append(&self, entry: &ResultLogEntry) -> io::Result<()> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "result log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

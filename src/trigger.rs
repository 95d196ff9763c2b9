//! The per-event hook invoked by udev.
//!
//! Every invocation is an independent, stateless process. Whatever happens,
//! the hook exits 0 so the kernel's own device registration proceeds.

use std::fmt;

use tracing::{debug, info, warn};

use crate::activity_log::ActivityLog;
use crate::channel::{ChannelError, EventWriter};
use crate::protocol::{encode_line, MalformedEventError};
use crate::readiness::ReadinessChecker;

pub const NOT_READY_MESSAGE: &str = "Not running hotplug, not ready yet";

/// Event fields exactly as udev handed them over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub subsystem: String,
    pub devpath: String,
    pub action: String,
}

impl RawEvent {
    pub fn new(
        subsystem: impl Into<String>,
        devpath: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subsystem: subsystem.into(),
            devpath: devpath.into(),
            action: action.into(),
        }
    }
}

/// What a single hook invocation did
#[derive(Debug)]
pub enum TriggerOutcome {
    /// Handler not listening; nothing written
    NotReady,
    /// One line handed to the channel
    Queued { line: String },
    /// Fields could not be framed; nothing written
    Rejected { reason: MalformedEventError },
    /// The channel refused the write
    WriteFailed { line: String, error: ChannelError },
}

impl TriggerOutcome {
    /// Always 0: a failure here must not interfere with device registration
    pub fn exit_code(&self) -> i32 {
        0
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, TriggerOutcome::Queued { .. })
    }
}

impl fmt::Display for TriggerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerOutcome::NotReady => f.write_str(NOT_READY_MESSAGE),
            TriggerOutcome::Queued { line } => write!(f, "Running hotplug hook: {line}"),
            TriggerOutcome::Rejected { reason } => write!(f, "Rejected hotplug event: {reason}"),
            TriggerOutcome::WriteFailed { line, error } => {
                write!(f, "Failed to queue hotplug hook: {line}: {error}")
            }
        }
    }
}

pub struct Trigger<'a> {
    readiness: &'a dyn ReadinessChecker,
    writer: &'a dyn EventWriter,
    log: &'a ActivityLog,
}

impl<'a> Trigger<'a> {
    pub fn new(
        readiness: &'a dyn ReadinessChecker,
        writer: &'a dyn EventWriter,
        log: &'a ActivityLog,
    ) -> Self {
        Self {
            readiness,
            writer,
            log,
        }
    }

    /// Gate on readiness, encode, write once, record what happened.
    pub fn run(&self, event: &RawEvent) -> TriggerOutcome {
        let outcome = self.dispatch(event);

        match &outcome {
            TriggerOutcome::Queued { .. } => info!("{}", outcome),
            TriggerOutcome::NotReady => debug!(mode = self.readiness.mode().name(), "{}", outcome),
            _ => warn!("{}", outcome),
        }

        if let Err(e) = self.log.record(&outcome.to_string()) {
            warn!("Failed to append to {}: {}", self.log.path().display(), e);
        }

        outcome
    }

    fn dispatch(&self, event: &RawEvent) -> TriggerOutcome {
        if !self.readiness.ready() {
            return TriggerOutcome::NotReady;
        }

        let line = match encode_line(&event.subsystem, &event.devpath, &event.action) {
            Ok(line) => line,
            Err(reason) => return TriggerOutcome::Rejected { reason },
        };

        match self.writer.send_line(&line) {
            Ok(()) => TriggerOutcome::Queued { line },
            Err(error) => TriggerOutcome::WriteFailed { line, error },
        }
    }
}

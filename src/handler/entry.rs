use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::result::ResultLogEntry;
use crate::protocol::HotplugEvent;

/// Processing status of one dequeued event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    InProgress,
    Applied,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Applied | ProcessingStatus::Failed | ProcessingStatus::Skipped
        )
    }

    /// `Pending -> InProgress -> {Applied, Failed, Skipped}`, nothing else
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        match self {
            ProcessingStatus::Pending => next == ProcessingStatus::InProgress,
            ProcessingStatus::InProgress => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::InProgress => "in progress",
            ProcessingStatus::Applied => "applied",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
}

/// How processing of one event ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Desired configuration is in effect; `changed` is false when it already was
    Applied { changed: bool },
    Failed(String),
    Skipped(String),
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Outcome::Failed(reason.into())
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped(reason.into())
    }

    pub fn status(&self) -> ProcessingStatus {
        match self {
            Outcome::Applied { .. } => ProcessingStatus::Applied,
            Outcome::Failed(_) => ProcessingStatus::Failed,
            Outcome::Skipped(_) => ProcessingStatus::Skipped,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Applied { changed: true } => None,
            Outcome::Applied { changed: false } => Some("already up to date"),
            Outcome::Failed(reason) | Outcome::Skipped(reason) => Some(reason),
        }
    }
}

/// One channel line on its way through the handler.
///
/// Lives for exactly one processing pass: `finish` consumes it and hands back
/// the log record.
#[derive(Debug)]
pub struct QueueEntry {
    raw: String,
    event: Option<HotplugEvent>,
    status: ProcessingStatus,
    dequeued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// A freshly dequeued line, `Pending`
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            event: None,
            status: ProcessingStatus::Pending,
            dequeued_at: Utc::now(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Record the parsed event
    pub fn attach(&mut self, event: HotplugEvent) {
        self.event = Some(event);
    }

    fn transition(&mut self, next: ProcessingStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// `Pending -> InProgress`
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.transition(ProcessingStatus::InProgress)
    }

    /// Move to the outcome's terminal status and turn the entry into its log record
    pub fn finish(mut self, outcome: Outcome) -> Result<ResultLogEntry, TransitionError> {
        self.transition(outcome.status())?;
        Ok(ResultLogEntry::new(
            self.raw,
            self.event,
            self.dequeued_at,
            &outcome,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ProcessingStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Applied));
        for terminal in [Applied, Failed, Skipped] {
            assert!(InProgress.can_transition_to(terminal));
            assert!(terminal.is_terminal());
            for next in [Pending, InProgress, Applied, Failed, Skipped] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!InProgress.can_transition_to(Pending));
    }

    #[test]
    fn test_entry_lifecycle() {
        let mut entry = QueueEntry::new("line");
        assert_eq!(entry.status(), ProcessingStatus::Pending);

        entry.begin().unwrap();
        assert_eq!(entry.status(), ProcessingStatus::InProgress);
        assert!(entry.begin().is_err());

        let result = entry.finish(Outcome::skipped("device not found")).unwrap();
        assert_eq!(result.status, ProcessingStatus::Skipped);
        assert_eq!(result.reason.as_deref(), Some("device not found"));
        assert!(result.dequeued_at <= result.timestamp);
    }

    #[test]
    fn test_finish_requires_begin() {
        let entry = QueueEntry::new("line");
        let err = entry.finish(Outcome::Applied { changed: true }).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: ProcessingStatus::Pending,
                to: ProcessingStatus::Applied
            }
        );
    }
}

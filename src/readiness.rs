//! Readiness probing for the hook.
//!
//! The hook runs inline in udev's event dispatch, so a probe is a single
//! `stat(2)` and never blocks.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How readiness of the resident handler is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// The init system creates the channel ahead of the handler and wakes it on first write
    SocketActivated,
    /// No activation facility; the boot orchestrator drops a marker when it finishes
    MarkerFile,
}

impl ReadinessMode {
    /// Pick a mode from the host: activation is available iff the init
    /// system's runtime directory exists.
    pub fn detect(activation_probe: &Path) -> Self {
        let mode = if activation_probe.is_dir() {
            ReadinessMode::SocketActivated
        } else {
            ReadinessMode::MarkerFile
        };
        debug!(
            probe = %activation_probe.display(),
            mode = mode.name(),
            "Detected readiness mode"
        );
        mode
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ReadinessMode::SocketActivated => "socket activated",
            ReadinessMode::MarkerFile => "marker file",
        }
    }
}

/// Answers whether the resident handler can currently receive events
pub trait ReadinessChecker: Send + Sync {
    /// Side-effect free and constant time
    fn ready(&self) -> bool;

    /// Strategy in use
    fn mode(&self) -> ReadinessMode;
}

/// Ready iff the channel path exists and is a FIFO.
///
/// Activation guarantees a pipe; a regular file at the same path means
/// something else put it there and the handler is not listening.
#[derive(Debug, Clone)]
pub struct SocketActivationChecker {
    channel_path: PathBuf,
}

impl SocketActivationChecker {
    pub fn new(channel_path: impl Into<PathBuf>) -> Self {
        Self {
            channel_path: channel_path.into(),
        }
    }
}

impl ReadinessChecker for SocketActivationChecker {
    fn ready(&self) -> bool {
        fs::metadata(&self.channel_path)
            .map(|meta| meta.file_type().is_fifo())
            .unwrap_or(false)
    }

    fn mode(&self) -> ReadinessMode {
        ReadinessMode::SocketActivated
    }
}

/// Ready iff the boot-finished marker exists
#[derive(Debug, Clone)]
pub struct MarkerFileChecker {
    marker_path: PathBuf,
}

impl MarkerFileChecker {
    pub fn new(marker_path: impl Into<PathBuf>) -> Self {
        Self {
            marker_path: marker_path.into(),
        }
    }
}

impl ReadinessChecker for MarkerFileChecker {
    fn ready(&self) -> bool {
        fs::metadata(&self.marker_path).is_ok()
    }

    fn mode(&self) -> ReadinessMode {
        ReadinessMode::MarkerFile
    }
}

/// Build the checker for a mode. Called once per process start.
pub fn checker_for(
    mode: ReadinessMode,
    channel_path: &Path,
    marker_path: &Path,
) -> Box<dyn ReadinessChecker> {
    match mode {
        ReadinessMode::SocketActivated => Box::new(SocketActivationChecker::new(channel_path)),
        ReadinessMode::MarkerFile => Box::new(MarkerFileChecker::new(marker_path)),
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::MalformedEventError;

/// Kernel device event actions understood by the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotplugAction {
    /// Device was attached
    Add,
    /// Device was detached
    Remove,
    /// Device attributes changed
    Change,
}

impl HotplugAction {
    /// Wire representation used by `--udevaction=`
    pub fn as_str(&self) -> &'static str {
        match self {
            HotplugAction::Add => "add",
            HotplugAction::Remove => "remove",
            HotplugAction::Change => "change",
        }
    }
}

impl fmt::Display for HotplugAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HotplugAction {
    type Err = MalformedEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(HotplugAction::Add),
            "remove" => Ok(HotplugAction::Remove),
            "change" => Ok(HotplugAction::Change),
            other => Err(MalformedEventError::UnknownAction(other.to_string())),
        }
    }
}

/// A single hotplug notification as carried over the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugEvent {
    /// Kernel subsystem tag, e.g. `net`
    pub subsystem: String,
    /// Kernel device path, e.g. `/devices/pci0000:00/net/eth1`
    pub devpath: String,
    /// What happened to the device
    pub action: HotplugAction,
    /// When the handler took the event off the channel
    pub received_at: DateTime<Utc>,
}

impl HotplugEvent {
    /// Create a validated event stamped with the current time
    pub fn new(
        subsystem: impl Into<String>,
        devpath: impl Into<String>,
        action: HotplugAction,
    ) -> Result<Self, MalformedEventError> {
        let subsystem = subsystem.into();
        let devpath = devpath.into();

        if subsystem.is_empty() {
            return Err(MalformedEventError::MissingValue("--subsystem"));
        }
        validate_devpath(&devpath)?;

        Ok(Self {
            subsystem,
            devpath,
            action,
            received_at: Utc::now(),
        })
    }
}

impl fmt::Display for HotplugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action, self.subsystem, self.devpath)
    }
}

/// Devpaths are resolved under the sysfs root, so they must stay inside it.
pub(crate) fn validate_devpath(devpath: &str) -> Result<(), MalformedEventError> {
    let invalid = |reason| MalformedEventError::InvalidDevpath {
        devpath: devpath.to_string(),
        reason,
    };

    if devpath.is_empty() {
        return Err(MalformedEventError::MissingValue("--devpath"));
    }
    if !devpath.starts_with('/') {
        return Err(invalid("must be absolute"));
    }
    if devpath.split('/').any(|component| component == "..") {
        return Err(invalid("must not contain '..'"));
    }
    if devpath == "/" {
        return Err(invalid("must name a device"));
    }

    Ok(())
}

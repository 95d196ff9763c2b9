use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::handler::{CorrelationSettings, HandlerSettings};
use crate::logging::LoggingConfig;
use crate::readiness::ReadinessMode;
use crate::reconcile::ReconciliationPolicy;
use crate::retry::RetryPolicy;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hotplugd/hotplugd.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration shared by `hotplugd` and `hotplug-hook`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// Filesystem locations
    pub paths: PathsConfig,

    /// Readiness strategy
    pub readiness: ReadinessConfig,

    /// Event handling
    pub handler: HandlerConfig,

    /// Metadata source
    pub metadata: MetadataConfig,

    /// Matching devices against metadata
    pub correlation: CorrelationConfig,

    /// Configuration applier
    pub applier: ApplierConfig,

    /// Startup reconciliation
    pub reconcile: ReconcileConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Named pipe between hook and handler
    pub channel: PathBuf,

    /// Boot-finished marker for the marker file strategy
    pub marker: PathBuf,

    /// Runtime directory whose presence means socket activation is available
    pub activation_probe: PathBuf,

    /// Human-readable activity log
    pub activity_log: PathBuf,

    /// Where sysfs is mounted
    pub sysfs_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            channel: "/run/hotplugd/hook-hotplug-cmd".into(),
            marker: "/run/hotplugd/boot-finished".into(),
            activation_probe: "/run/systemd".into(),
            activity_log: "/run/hotplugd/hook-hotplug.log".into(),
            sysfs_root: "/sys".into(),
        }
    }
}

/// Readiness mode as configured; `Auto` is resolved against the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessSetting {
    #[default]
    Auto,
    SocketActivated,
    MarkerFile,
}

impl std::str::FromStr for ReadinessSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ReadinessSetting::Auto),
            "socket_activated" => Ok(ReadinessSetting::SocketActivated),
            "marker_file" => Ok(ReadinessSetting::MarkerFile),
            other => Err(ConfigError::Invalid(format!("unknown readiness mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub mode: ReadinessSetting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Subsystems acted upon; events for any other are skipped
    pub supported_subsystems: Vec<String>,

    /// Bound on reading a device's identity from sysfs
    #[serde(with = "humantime_serde")]
    pub device_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            supported_subsystems: vec!["net".to_string()],
            device_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// JSON inventory published by the metadata agent
    pub inventory_path: PathBuf,

    /// Bound on a single inventory fetch
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Retries for transient failures
    pub retry: RetryPolicy,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            inventory_path: "/run/hotplugd/inventory.json".into(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// How long to keep looking for a device missing from metadata
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Pause between lookups
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    /// One applied fragment per device is kept here
    pub state_dir: PathBuf,

    /// Bound on each apply/remove/query
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Argv run after every change, empty for none
    pub post_apply_command: Vec<String>,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            state_dir: "/run/hotplugd/applied".into(),
            timeout: Duration::from_secs(30),
            post_apply_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub policy: ReconciliationPolicy,
}

impl HotplugConfig {
    /// Load configuration from file; a missing file gives the defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: HotplugConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, content).map_err(write_error)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        };

        if self.handler.supported_subsystems.is_empty() {
            return invalid("supported_subsystems must not be empty");
        }
        if self.handler.device_timeout.is_zero() {
            return invalid("handler.device_timeout must be greater than 0");
        }

        if self.metadata.retry.max_attempts == 0 {
            return invalid("metadata.retry.max_attempts must be greater than 0");
        }
        if self.metadata.request_timeout.is_zero() {
            return invalid("metadata.request_timeout must be greater than 0");
        }

        if self.correlation.timeout.is_zero() {
            return invalid("correlation.timeout must be greater than 0");
        }
        if self.correlation.poll_interval.is_zero() {
            return invalid("correlation.poll_interval must be greater than 0");
        }
        if self.correlation.poll_interval > self.correlation.timeout {
            return invalid("correlation.poll_interval cannot exceed correlation.timeout");
        }

        if self.applier.timeout.is_zero() {
            return invalid("applier.timeout must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Override configuration with environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("HOTPLUGD_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("HOTPLUGD_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(path) = std::env::var_os("HOTPLUGD_CHANNEL_PATH") {
            self.paths.channel = PathBuf::from(path);
        }

        if let Ok(mode) = std::env::var("HOTPLUGD_READINESS_MODE") {
            if let Ok(mode) = mode.parse() {
                self.readiness.mode = mode;
            }
        }
    }

    /// Concrete readiness mode, probing the host when configured as `auto`
    pub fn readiness_mode(&self) -> ReadinessMode {
        match self.readiness.mode {
            ReadinessSetting::Auto => ReadinessMode::detect(&self.paths.activation_probe),
            ReadinessSetting::SocketActivated => ReadinessMode::SocketActivated,
            ReadinessSetting::MarkerFile => ReadinessMode::MarkerFile,
        }
    }

    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            supported_subsystems: self.handler.supported_subsystems.clone(),
            correlation: CorrelationSettings {
                request_timeout: self.metadata.request_timeout,
                retry: self.metadata.retry.clone(),
                timeout: self.correlation.timeout,
                poll_interval: self.correlation.poll_interval,
            },
            applier_timeout: self.applier.timeout,
            device_timeout: self.handler.device_timeout,
        }
    }
}

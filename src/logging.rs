use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (compact, pretty, json)
    pub format: String,
    /// Log file path; stderr when unset
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            file_path: None,
        }
    }
}

impl LoggingConfig {
    /// The hook runs inside udev, which captures stderr; keep it quiet
    pub fn hook() -> Self {
        Self {
            level: "warn".to_string(),
            ..Self::default()
        }
    }
}

/// Initialize structured logging based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => create_env_filter(&config.level)?,
    };

    let writer = match &config.file_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("Failed to open log file: {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.file_path.is_none());

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to set global tracing subscriber: {}", e))?;

    tracing::debug!("Structured logging initialized with level: {}", config.level);
    Ok(())
}

/// Set up panic hook to log panics
pub fn setup_panic_hook() {
    let original_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let panic_msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = if let Some(location) = panic_info.location() {
            format!("{}:{}:{}", location.file(), location.line(), location.column())
        } else {
            "Unknown location".to_string()
        };

        tracing::error!(
            panic.msg = panic_msg,
            panic.location = location,
            "Application panicked"
        );

        original_hook(panic_info);
    }));
}

fn create_env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).context(format!("Invalid log filter: {}", level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "compact");
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_hook_logging_is_quiet() {
        let config = LoggingConfig::hook();
        assert_eq!(config.level, "warn");
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("debug").is_ok());
        assert!(create_env_filter("hotplugd=trace,warn").is_ok());
        assert!(create_env_filter("hotplugd=notalevel").is_err());
    }

    #[test]
    fn test_logging_config_from_toml() {
        let config: LoggingConfig = toml::from_str(
            r#"
            format = "json"
            file_path = "/var/log/hotplugd/hotplugd.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.level, "info");
        assert_eq!(config.format, "json");
        assert_eq!(
            config.file_path,
            Some(PathBuf::from("/var/log/hotplugd/hotplugd.log"))
        );
    }
}

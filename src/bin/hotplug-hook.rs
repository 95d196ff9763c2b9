//! udev callout: `RUN+="/usr/lib/hotplugd/hotplug-hook"`.
//!
//! Exits 0 no matter what, including on bad arguments or configuration.

use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

use hotplugd::activity_log::ActivityLog;
use hotplugd::channel::FifoWriter;
use hotplugd::config::{HotplugConfig, DEFAULT_CONFIG_PATH};
use hotplugd::logging::{init_logging, LoggingConfig};
use hotplugd::readiness::checker_for;
use hotplugd::{RawEvent, Trigger};

#[derive(Parser, Debug)]
#[command(name = "hotplug-hook")]
#[command(about = "Forward a udev event to the resident hotplug handler")]
struct Args {
    /// Kernel subsystem of the device
    #[arg(long, env = "SUBSYSTEM", default_value = "")]
    subsystem: String,

    /// Kernel device path
    #[arg(long, env = "DEVPATH", default_value = "")]
    devpath: String,

    /// udev action (add, remove, change)
    #[arg(long, env = "ACTION", default_value = "")]
    action: String,

    /// Configuration file
    #[arg(long, env = "HOTPLUGD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(0);
        }
    };

    let _ = init_logging(&LoggingConfig::hook());

    let mut config = match HotplugConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default configuration: {}", e);
            HotplugConfig::default()
        }
    };
    config.apply_env_overrides();

    let readiness = checker_for(
        config.readiness_mode(),
        &config.paths.channel,
        &config.paths.marker,
    );
    let writer = FifoWriter::new(&config.paths.channel);
    let log = ActivityLog::new(&config.paths.activity_log);

    let event = RawEvent::new(args.subsystem, args.devpath, args.action);
    let outcome = Trigger::new(readiness.as_ref(), &writer, &log).run(&event);

    std::process::exit(outcome.exit_code());
}

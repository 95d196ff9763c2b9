use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use hotplugd::config::{HotplugConfig, DEFAULT_CONFIG_PATH};
use hotplugd::logging::{init_logging, setup_panic_hook};
use hotplugd::HotplugDaemon;

#[derive(Parser, Debug)]
#[command(name = "hotplugd")]
#[command(about = "Resident hotplug handler")]
struct Args {
    /// Configuration file
    #[arg(long, short, env = "HOTPLUGD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = HotplugConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.apply_env_overrides();
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    config.validate().context("Configuration validation failed")?;

    if args.print_config {
        let rendered =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
        print!("{rendered}");
        return Ok(());
    }

    init_logging(&config.logging)?;
    setup_panic_hook();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting hotplugd"
    );

    let daemon = HotplugDaemon::new(config)?;
    let stats = daemon.run().await?;

    info!("Shutdown complete: {}", stats);
    Ok(())
}

use crate::activity_log::ActivityLog;
use crate::applier::FragmentDirApplier;
use crate::channel::{create_fifo, FifoReader};
use crate::config::HotplugConfig;
use crate::device::SysfsIdentityReader;
use crate::handler::{HandlerStats, HotplugHandler};
use crate::metadata::FileMetadataClient;
use crate::readiness::ReadinessMode;
use crate::reconcile::reconcile;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

/// Resident side of the hotplug subsystem: owns the channel and the handler
pub struct HotplugDaemon {
    config: HotplugConfig,
    mode: ReadinessMode,
}

impl HotplugDaemon {
    /// Create new daemon with configuration
    pub fn new(config: HotplugConfig) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;
        let mode = config.readiness_mode();

        info!(
            channel = %config.paths.channel.display(),
            mode = mode.name(),
            "Initializing hotplug daemon"
        );

        Ok(Self { config, mode })
    }

    pub fn readiness_mode(&self) -> ReadinessMode {
        self.mode
    }

    /// Handler wired to the configured metadata source, applier and sysfs
    pub fn build_handler(&self) -> HotplugHandler {
        let applier = FragmentDirApplier::new(&self.config.applier.state_dir)
            .with_post_apply_command(self.config.applier.post_apply_command.clone());

        HotplugHandler::new(
            self.config.handler_settings(),
            Arc::new(FileMetadataClient::new(&self.config.metadata.inventory_path)),
            Arc::new(applier),
            Arc::new(SysfsIdentityReader::new(&self.config.paths.sysfs_root)),
            Arc::new(ActivityLog::new(&self.config.paths.activity_log)),
        )
    }

    /// Run until SIGTERM/SIGINT or the channel closes
    pub async fn run(&self) -> Result<HandlerStats> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        spawn_signal_watcher(shutdown_tx)?;
        self.run_until(shutdown_rx).await
    }

    /// Run until `shutdown` turns true or the channel closes
    pub async fn run_until(&self, shutdown: watch::Receiver<bool>) -> Result<HandlerStats> {
        let channel = &self.config.paths.channel;

        // Under socket activation the init system already created the pipe;
        // creating it is then a no-op.
        create_fifo(channel)
            .with_context(|| format!("Failed to create event channel {}", channel.display()))?;
        let mut source = FifoReader::open(channel)
            .with_context(|| format!("Failed to open event channel {}", channel.display()))?;

        let mut handler = self.build_handler();

        if let Err(e) = reconcile(
            self.config.reconcile.policy,
            &self.config.paths.sysfs_root,
            &mut handler,
        )
        .await
        {
            warn!("Reconciliation failed: {}", e);
        }

        info!("Hotplug daemon is now running");
        let stats = handler.run(&mut source, shutdown).await;
        info!("Hotplug daemon stopped");
        Ok(stats)
    }
}

/// Turn SIGTERM/SIGINT into a shutdown request
fn spawn_signal_watcher(shutdown: watch::Sender<bool>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        let _ = shutdown.send(true);
    });

    Ok(())
}

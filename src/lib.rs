pub mod activity_log;
pub mod applier;
pub mod channel;
pub mod config;
pub mod daemon;
pub mod device;
pub mod handler;
pub mod logging;
pub mod metadata;
pub mod protocol;
pub mod readiness;
pub mod reconcile;
pub mod retry;
pub mod trigger;

pub use config::HotplugConfig;
pub use daemon::HotplugDaemon;
pub use handler::HotplugHandler;
pub use protocol::{HotplugAction, HotplugEvent};
pub use trigger::{RawEvent, Trigger, TriggerOutcome};

//! Hotplug event model and the line-oriented wire grammar shared by the hook
//! and the resident handler.

pub mod error;
pub mod event;
pub mod wire;

pub use error::MalformedEventError;
pub use event::{HotplugAction, HotplugEvent};
pub use wire::{encode_line, parse_line, MAX_EVENT_LINE};

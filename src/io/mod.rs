//! IO modules - external system interfaces
//!
//! - `gpio` - Sampling backends for the beam input (sysfs, fixed)
//! - `collector` - HTTP transport to the remote collector
//! - `api` - HTTP control API (health, start/stop, metrics)
//! - `event_log` - CSV file of readings for the local recorder

pub mod api;
pub mod collector;
pub mod event_log;
pub mod gpio;

// Re-export commonly used types
pub use collector::{DeliveryError, HttpCollector, Transport};
pub use event_log::EventLog;
pub use gpio::{FixedSampler, Sampler, SysfsGpio};

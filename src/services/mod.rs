//! Services - debouncing, monitoring and delivery
//!
//! - `debounce` - Pure single-interval debounce filter
//! - `engine` - Beam watcher: polling loop, lifecycle, transition callbacks
//! - `delivery_worker` - Async sender that keeps network I/O off the polling path
//! - `pipeline` - Delivery pipeline: message shaping, heartbeats, status

pub mod debounce;
pub mod delivery_worker;
pub mod engine;
pub mod pipeline;

// Re-export commonly used types
pub use debounce::{Debouncer, Observation};
pub use delivery_worker::{create_delivery_worker, Delivery, DeliveryWorker};
pub use engine::{BeamWatcher, CallbackFault, EngineLifecycle, OnChange, DEFAULT_POLL_INTERVAL};
pub use pipeline::{DeliveryPipeline, MonitorStatus};

//! Infrastructure - configuration and metrics
//!
//! - `config` - Application configuration (TOML loading, env overrides, defaults)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;

pub use config::{Config, SamplerBackend};
pub use metrics::{Metrics, MetricsSummary};

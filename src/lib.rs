//! Beam agent library
//!
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;

use crate::domain::types::SensorLevel;
use crate::infra::config::{Config, SamplerBackend};
use crate::io::gpio::{FixedSampler, Sampler, SysfsGpio};
use std::sync::Arc;

/// Build and initialize the sampling backend selected in config
pub fn build_sampler(config: &Config) -> std::io::Result<Arc<dyn Sampler>> {
    let sampler: Arc<dyn Sampler> = match config.sampler_backend() {
        SamplerBackend::Sysfs => Arc::new(SysfsGpio::new(config.sysfs_root(), config.pin())),
        SamplerBackend::Fixed => {
            Arc::new(FixedSampler::new(SensorLevel::from_raw(config.fixed_level())))
        }
    };
    sampler.init()?;
    Ok(sampler)
}

/// [`build_sampler`] on the blocking pool; sysfs setup sleeps between retries
pub async fn init_sampler(config: &Config) -> std::io::Result<Arc<dyn Sampler>> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || build_sampler(&config))
        .await
        .map_err(std::io::Error::other)?
}

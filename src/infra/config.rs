//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! After the file is loaded, the deployment environment variables `PIN`,
//! `URL`, `DEVICE`, `HEARTBEAT`, `DEBOUNCE` and `LOGFILE` override it.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerBackend {
    /// Linux sysfs GPIO (`/sys/class/gpio`)
    Sysfs,
    /// Constant level, for development machines without GPIO
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { name: default_device_name() }
    }
}

fn default_device_name() -> String {
    "pi3-nani".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_pin")]
    pub pin: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_backend")]
    pub backend: SamplerBackend,
    /// Level reported by the fixed backend (0 or 1)
    #[serde(default = "default_fixed_level")]
    pub fixed_level: u8,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pin: default_pin(),
            poll_interval_ms: default_poll_interval_ms(),
            backend: default_backend(),
            fixed_level: default_fixed_level(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

fn default_pin() -> u32 {
    27
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_backend() -> SamplerBackend {
    SamplerBackend::Sysfs
}

fn default_fixed_level() -> u8 {
    1
}

fn default_sysfs_root() -> String {
    "/sys/class/gpio".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Collector URL (empty = not configured yet)
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Capacity of the outbound delivery queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_ms: default_timeout_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    4000
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_queue_size() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind_address")]
    pub bind_address: String,
    /// Control API port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: default_api_bind_address(), port: default_api_port() }
    }
}

fn default_api_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// CSV file written by `beam-log`
    #[serde(default = "default_event_log_file")]
    pub file: String,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { file: default_event_log_file() }
    }
}

fn default_event_log_file() -> String {
    "beam_events.csv".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device: String,
    pin: u32,
    poll_interval_ms: u64,
    sampler_backend: SamplerBackend,
    fixed_level: u8,
    sysfs_root: String,
    url: Option<String>,
    delivery_timeout_ms: u64,
    heartbeat_secs: u64,
    delivery_queue_size: usize,
    api_bind_address: String,
    api_port: u16,
    metrics_interval_secs: u64,
    event_log_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

/// Normalize a destination URL: blank means "not configured"
pub fn normalize_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            device: toml_config.device.name,
            pin: toml_config.sensor.pin,
            poll_interval_ms: toml_config.sensor.poll_interval_ms,
            sampler_backend: toml_config.sensor.backend,
            fixed_level: toml_config.sensor.fixed_level,
            sysfs_root: toml_config.sensor.sysfs_root,
            url: normalize_url(&toml_config.delivery.url),
            delivery_timeout_ms: toml_config.delivery.timeout_ms,
            heartbeat_secs: toml_config.delivery.heartbeat_secs,
            delivery_queue_size: toml_config.delivery.queue_size,
            api_bind_address: toml_config.api.bind_address,
            api_port: toml_config.api.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            event_log_file: toml_config.event_log.file,
            config_file,
        }
    }

    /// Determine config file path: explicit path, then CONFIG_FILE, then default
    pub fn resolve_config_path(explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults, then apply
    /// environment overrides
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        };
        config.with_env_overrides(|key| env::var(key).ok())
    }

    /// Apply deployment overrides looked up by `lookup` (normally the process
    /// environment). Unparseable values are ignored with a warning.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pin) = lookup("PIN") {
            match pin.trim().parse() {
                Ok(pin) => self.pin = pin,
                Err(_) => tracing::warn!(value = %pin, "invalid_env_pin"),
            }
        }
        if let Some(url) = lookup("URL") {
            self.url = normalize_url(&url);
        }
        if let Some(device) = lookup("DEVICE") {
            self.device = device;
        }
        if let Some(secs) = lookup("HEARTBEAT") {
            match secs.trim().parse() {
                Ok(secs) => self.heartbeat_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "invalid_env_heartbeat"),
            }
        }
        if let Some(debounce) = lookup("DEBOUNCE") {
            match debounce.trim().parse::<f64>() {
                Ok(secs) if secs > 0.0 => self.poll_interval_ms = (secs * 1000.0).round() as u64,
                _ => tracing::warn!(value = %debounce, "invalid_env_debounce"),
            }
        }
        if let Some(file) = lookup("LOGFILE") {
            self.event_log_file = file;
        }
        self
    }

    // Getters for all config fields
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn sampler_backend(&self) -> SamplerBackend {
        self.sampler_backend
    }

    pub fn fixed_level(&self) -> u8 {
        self.fixed_level
    }

    pub fn sysfs_root(&self) -> &str {
        &self.sysfs_root
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn delivery_queue_size(&self) -> usize {
        self.delivery_queue_size.max(1)
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn event_log_file(&self) -> &str {
        &self.event_log_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

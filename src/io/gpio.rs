//! Sampling backends for the beam input line
//!
//! The engine only sees the [`Sampler`] trait. Backends are picked at
//! composition time from config:
//! - [`SysfsGpio`] - Linux `/sys/class/gpio` interface on the Pi
//! - [`FixedSampler`] - constant (settable) level for development and tests

use crate::domain::types::SensorLevel;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts to open the direction file after exporting (udev may lag)
const MAX_EXPORT_ATTEMPTS: usize = 10;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Digital input sampling primitive.
///
/// `sample` is non-blocking and infallible from the caller's point of view;
/// backends absorb their own read errors.
pub trait Sampler: Send + Sync {
    /// One-time line setup
    fn init(&self) -> io::Result<()>;

    /// Read the current level
    fn sample(&self) -> SensorLevel;

    /// Teardown. Errors are logged, never returned.
    fn release(&self);

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// GPIO input through the Linux sysfs interface.
///
/// Sysfs cannot configure pull resistors; the line is expected to have the
/// pull-up enabled by the device tree (the Pi default for BCM 27).
pub struct SysfsGpio {
    root: PathBuf,
    pin: u32,
    /// Set while reads are failing, so only the first failure warns
    read_failing: AtomicBool,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>, pin: u32) -> Self {
        Self { root: root.into(), pin, read_failing: AtomicBool::new(false) }
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn read_level(&self) -> io::Result<SensorLevel> {
        let raw = fs::read_to_string(self.pin_dir().join("value"))?;
        match raw.trim() {
            "0" => Ok(SensorLevel::Asserted),
            "1" => Ok(SensorLevel::Released),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected gpio value {:?}", other),
            )),
        }
    }
}

impl Sampler for SysfsGpio {
    fn init(&self) -> io::Result<()> {
        if !self.pin_dir().exists() {
            fs::write(self.root.join("export"), self.pin.to_string())?;
            debug!(pin = %self.pin, "gpio_exported");
        }

        let direction = self.pin_dir().join("direction");
        let mut attempts = 0;
        loop {
            attempts += 1;
            match fs::write(&direction, "in") {
                Ok(()) => break,
                Err(e) if attempts < MAX_EXPORT_ATTEMPTS => {
                    debug!(pin = %self.pin, attempt = attempts, error = %e, "gpio_direction_retry");
                    std::thread::sleep(EXPORT_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }

        info!(pin = %self.pin, root = %self.root.display(), "gpio_sysfs_ready");
        Ok(())
    }

    fn sample(&self) -> SensorLevel {
        match self.read_level() {
            Ok(level) => {
                if self.read_failing.swap(false, Ordering::Relaxed) {
                    info!(pin = %self.pin, "gpio_read_recovered");
                }
                level
            }
            Err(e) => {
                if !self.read_failing.swap(true, Ordering::Relaxed) {
                    warn!(pin = %self.pin, error = %e, "gpio_read_failed");
                }
                // Pull-up idle level
                SensorLevel::Released
            }
        }
    }

    fn release(&self) {
        if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
            debug!(pin = %self.pin, error = %e, "gpio_unexport_failed");
        } else {
            info!(pin = %self.pin, "gpio_released");
        }
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}

/// Constant-level sampler. The level can be changed at runtime.
pub struct FixedSampler {
    raw: AtomicU8,
}

impl FixedSampler {
    pub fn new(level: SensorLevel) -> Self {
        Self { raw: AtomicU8::new(level.raw()) }
    }

    pub fn set_level(&self, level: SensorLevel) {
        self.raw.store(level.raw(), Ordering::Relaxed);
    }
}

impl Default for FixedSampler {
    /// Clear beam, like an idle pulled-up line
    fn default() -> Self {
        Self::new(SensorLevel::Released)
    }
}

impl Sampler for FixedSampler {
    fn init(&self) -> io::Result<()> {
        Ok(())
    }

    fn sample(&self) -> SensorLevel {
        SensorLevel::from_raw(self.raw.load(Ordering::Relaxed))
    }

    fn release(&self) {}

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_sysfs(pin: u32, value: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let pin_dir = dir.path().join(format!("gpio{}", pin));
        fs::create_dir_all(&pin_dir).unwrap();
        fs::write(pin_dir.join("value"), value).unwrap();
        dir
    }

    #[test]
    fn test_sysfs_reads_levels() {
        let dir = fake_sysfs(27, "0\n");
        let gpio = SysfsGpio::new(dir.path(), 27);
        gpio.init().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("gpio27/direction")).unwrap(), "in");
        assert_eq!(gpio.sample(), SensorLevel::Asserted);

        fs::write(dir.path().join("gpio27/value"), "1\n").unwrap();
        assert_eq!(gpio.sample(), SensorLevel::Released);
    }

    #[test]
    fn test_sysfs_read_failure_reports_released() {
        let dir = fake_sysfs(27, "garbage");
        let gpio = SysfsGpio::new(dir.path(), 27);
        assert_eq!(gpio.sample(), SensorLevel::Released);
        assert!(gpio.read_failing.load(Ordering::Relaxed));

        fs::write(dir.path().join("gpio27/value"), "0").unwrap();
        assert_eq!(gpio.sample(), SensorLevel::Asserted);
        assert!(!gpio.read_failing.load(Ordering::Relaxed));
    }

    #[test]
    fn test_sysfs_release_unexports() {
        let dir = fake_sysfs(5, "1");
        let gpio = SysfsGpio::new(dir.path(), 5);
        gpio.release();
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "5");
    }

    #[test]
    fn test_fixed_sampler() {
        let sampler = FixedSampler::default();
        assert_eq!(sampler.sample(), SensorLevel::Released);
        sampler.set_level(SensorLevel::Asserted);
        assert_eq!(sampler.sample(), SensorLevel::Asserted);
        assert_eq!(sampler.name(), "fixed");
    }
}

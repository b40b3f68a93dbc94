//! Local event log - appends readings to a CSV file
//!
//! Columns: `timestamp,value,meaning,pin`. The header is written when the
//! file is created.

use crate::domain::types::{format_ts, TransitionEvent};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

const HEADER: &str = "timestamp,value,meaning,pin";

/// CSV writer for beam readings
pub struct EventLog {
    file_path: String,
    pin: u32,
}

impl EventLog {
    pub fn new(file_path: &str, pin: u32) -> Self {
        info!(file_path = %file_path, "event_log_initialized");
        Self { file_path: file_path.to_string(), pin }
    }

    /// Append a reading. Returns true if successful, false otherwise.
    pub fn record(&self, event: &TransitionEvent) -> bool {
        let line = format!(
            "{},{},{},{}",
            format_ts(&event.timestamp),
            event.value.raw(),
            event.value.meaning(),
            self.pin
        );

        match self.append_line(&line) {
            Ok(()) => true,
            Err(e) => {
                error!(file = %self.file_path, error = %e, "event_log_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let new_file = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if new_file {
            writeln!(file, "{}", HEADER)?;
        }

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "event_log_written");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorLevel;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    #[test]
    fn test_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/beam.csv");
        let log = EventLog::new(path.to_str().unwrap(), 27);
        let ts = Local.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert!(log.record(&TransitionEvent { value: SensorLevel::Released, timestamp: ts }));
        assert!(log.record(&TransitionEvent { value: SensorLevel::Asserted, timestamp: ts }));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "timestamp,value,meaning,pin",
                "2025-06-01T12:00:00,1,CLEAR,27",
                "2025-06-01T12:00:00,0,BLOCKED,27",
            ]
        );
    }

    #[test]
    fn test_unwritable_path_reports_failure() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be
        let log = EventLog::new(dir.path().to_str().unwrap(), 27);
        let event = TransitionEvent { value: SensorLevel::Released, timestamp: Local::now() };
        assert!(!log.record(&event));
    }
}

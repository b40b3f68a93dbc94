//! Shared types for the beam agent

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// Wall-clock time of a reading, in the device's local timezone
pub type Timestamp = DateTime<Local>;

/// Format a timestamp as ISO-8601 local time with second precision
/// (e.g. `2025-03-14T09:26:53`), the format the collector expects.
pub fn format_ts(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Raw level of the beam input line.
///
/// Polarity is fixed by the wiring: the detector pulls the line low (0) while
/// the beam is blocked and the pull-up holds it high (1) while it is clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorLevel {
    /// Line low (0), beam blocked
    Asserted,
    /// Line high (1), beam clear
    Released,
}

impl SensorLevel {
    /// Interpret a raw logic level. Any non-zero value reads as high.
    pub fn from_raw(raw: u8) -> Self {
        if raw == 0 {
            SensorLevel::Asserted
        } else {
            SensorLevel::Released
        }
    }

    /// Raw logic level as sent on the wire
    pub fn raw(self) -> u8 {
        match self {
            SensorLevel::Asserted => 0,
            SensorLevel::Released => 1,
        }
    }

    /// Semantic meaning of the level
    pub fn meaning(self) -> &'static str {
        match self {
            SensorLevel::Asserted => "BLOCKED",
            SensorLevel::Released => "CLEAR",
        }
    }
}

impl fmt::Display for SensorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// The engine's settled view of the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncedState {
    pub value: SensorLevel,
    /// When `value` was last confirmed changed (or first read)
    pub since: Timestamp,
}

/// A confirmed change of the debounced level, including the initial reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEvent {
    pub value: SensorLevel,
    pub timestamp: Timestamp,
}

/// Kind of outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Blocked,
    Clear,
    Heartbeat,
}

impl EventKind {
    /// Event kind for a state change to `level`
    pub fn for_level(level: SensorLevel) -> Self {
        match level {
            SensorLevel::Asserted => EventKind::Blocked,
            SensorLevel::Released => EventKind::Clear,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Blocked => "BLOCKED",
            EventKind::Clear => "CLEAR",
            EventKind::Heartbeat => "HEARTBEAT",
        }
    }
}

/// JSON body posted to the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub event: EventKind,
    pub value: u8,
    pub pin: u32,
    pub device: String,
    pub ts: String,
}

impl OutboundMessage {
    /// Message reporting a state change
    pub fn transition(value: SensorLevel, ts: &Timestamp, pin: u32, device: &str) -> Self {
        Self {
            event: EventKind::for_level(value),
            value: value.raw(),
            pin,
            device: device.to_string(),
            ts: format_ts(ts),
        }
    }

    /// Liveness message carrying the last known level
    pub fn heartbeat(value: SensorLevel, ts: &Timestamp, pin: u32, device: &str) -> Self {
        Self {
            event: EventKind::Heartbeat,
            value: value.raw(),
            pin,
            device: device.to_string(),
            ts: format_ts(ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_meaning_is_fixed_polarity() {
        assert_eq!(SensorLevel::Asserted.meaning(), "BLOCKED");
        assert_eq!(SensorLevel::Released.meaning(), "CLEAR");
        assert_eq!(SensorLevel::from_raw(0), SensorLevel::Asserted);
        assert_eq!(SensorLevel::from_raw(1), SensorLevel::Released);
        assert_eq!(SensorLevel::from_raw(7), SensorLevel::Released);
    }

    #[test]
    fn test_format_ts_second_precision() {
        let ts = Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(format_ts(&ts), "2025-03-14T09:26:53");
    }

    #[test]
    fn test_outbound_message_json() {
        let ts = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let msg = OutboundMessage::transition(SensorLevel::Asserted, &ts, 27, "pi3-nani");
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "BLOCKED",
                "value": 0,
                "pin": 27,
                "device": "pi3-nani",
                "ts": "2025-01-02T03:04:05",
            })
        );
    }

    #[test]
    fn test_heartbeat_message_keeps_level() {
        let ts = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let msg = OutboundMessage::heartbeat(SensorLevel::Asserted, &ts, 17, "dev");
        assert_eq!(msg.event, EventKind::Heartbeat);
        assert_eq!(msg.value, 0);
        assert_eq!(serde_json::to_value(&msg).unwrap()["event"], "HEARTBEAT");
    }
}

//! Domain models - sensor levels, transitions and wire messages
//!
//! - `SensorLevel` - raw level of the beam input and its fixed meaning
//! - `DebouncedState` - the engine's settled reading
//! - `TransitionEvent` - one confirmed change handed to consumers
//! - `OutboundMessage` - JSON body posted to the collector

pub mod types;

pub use types::{
    format_ts, DebouncedState, EventKind, OutboundMessage, SensorLevel, Timestamp,
    TransitionEvent,
};

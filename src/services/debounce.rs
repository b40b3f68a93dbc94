//! Single-interval debounce filter
//!
//! A sample that differs from the confirmed level becomes a candidate. The
//! candidate is confirmed when the next poll reads the same level again; if
//! the next poll reads anything else the candidate is dropped as a glitch.
//! A level therefore has to be seen on two consecutive polls (one full poll
//! interval apart) before it is reported.

use crate::domain::types::SensorLevel;

/// What a single sample did to the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Sample matches the confirmed level
    Steady,
    /// Sample differs from the confirmed level, awaiting the next poll
    Pending(SensorLevel),
    /// Candidate seen twice in a row; it is now the confirmed level
    Confirmed(SensorLevel),
    /// Candidate did not repeat on the next poll
    Rejected(SensorLevel),
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    confirmed: SensorLevel,
    candidate: Option<SensorLevel>,
}

impl Debouncer {
    pub fn new(initial: SensorLevel) -> Self {
        Self { confirmed: initial, candidate: None }
    }

    pub fn confirmed(&self) -> SensorLevel {
        self.confirmed
    }

    /// Feed one sample
    pub fn observe(&mut self, sample: SensorLevel) -> Observation {
        if sample == self.confirmed {
            return match self.candidate.take() {
                Some(glitch) => Observation::Rejected(glitch),
                None => Observation::Steady,
            };
        }

        // Binary levels: a differing sample can only equal the candidate
        if self.candidate.take() == Some(sample) {
            self.confirmed = sample;
            Observation::Confirmed(sample)
        } else {
            self.candidate = Some(sample);
            Observation::Pending(sample)
        }
    }
}

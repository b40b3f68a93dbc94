//! Beam watcher - polls the input line and reports debounced transitions
//!
//! Lifecycle is `Stopped <-> Running`. `start` takes one immediate sample,
//! reports it as the initial transition, then spawns the polling loop. The
//! loop ticks every poll interval, feeds the [`Debouncer`] and invokes the
//! consumer callback once per confirmed change. `stop` signals the loop over a
//! watch channel; no callback fires after the loop has seen the signal.
//!
//! Callbacks run on the polling task and must not block. Panics inside a
//! callback are caught per invocation, logged as a [`CallbackFault`] and
//! counted; polling continues.

use crate::domain::types::{DebouncedState, SensorLevel, Timestamp, TransitionEvent};
use crate::infra::metrics::Metrics;
use crate::io::gpio::Sampler;
use crate::services::debounce::{Debouncer, Observation};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

/// Default poll interval, which is also the debounce window
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Consumer of transitions
pub type OnChange = Arc<dyn Fn(TransitionEvent) + Send + Sync>;

/// A consumer callback panicked
#[derive(Debug, Error)]
#[error("transition callback panicked: {message}")]
pub struct CallbackFault {
    pub message: String,
}

/// Extract a human-readable message from a panic payload
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Invoke `on_change`, isolating panics
fn dispatch(on_change: &OnChange, event: TransitionEvent) -> Result<(), CallbackFault> {
    catch_unwind(AssertUnwindSafe(|| on_change(event)))
        .map_err(|payload| CallbackFault { message: panic_message(payload) })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycle {
    Stopped,
    Running,
}

enum Lifecycle {
    Stopped,
    Running { stop_tx: watch::Sender<bool> },
}

pub struct BeamWatcher {
    pin: u32,
    poll_interval: Duration,
    sampler: Arc<dyn Sampler>,
    state: Arc<RwLock<Option<DebouncedState>>>,
    lifecycle: Mutex<Lifecycle>,
    metrics: Arc<Metrics>,
}

impl BeamWatcher {
    pub fn new(
        pin: u32,
        poll_interval: Duration,
        sampler: Arc<dyn Sampler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pin,
            poll_interval,
            sampler,
            state: Arc::new(RwLock::new(None)),
            lifecycle: Mutex::new(Lifecycle::Stopped),
            metrics,
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Meaning of a level on this hardware: 0 = BLOCKED, 1 = CLEAR
    pub fn meaning(level: SensorLevel) -> &'static str {
        level.meaning()
    }

    pub fn lifecycle(&self) -> EngineLifecycle {
        match *self.lifecycle.lock() {
            Lifecycle::Stopped => EngineLifecycle::Stopped,
            Lifecycle::Running { .. } => EngineLifecycle::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == EngineLifecycle::Running
    }

    /// Last confirmed reading, `None` before the first start
    pub fn current_state(&self) -> Option<DebouncedState> {
        *self.state.read()
    }

    /// Start watching. Returns `false` (and does nothing) if already running.
    ///
    /// `on_change` is invoked synchronously with the initial reading before
    /// this returns. Must be called within a tokio runtime.
    pub fn start(&self, on_change: OnChange) -> bool {
        let (initial, stop_rx) = {
            let mut lifecycle = self.lifecycle.lock();
            if matches!(*lifecycle, Lifecycle::Running { .. }) {
                return false;
            }

            let level = self.sampler.sample();
            let now = Local::now();
            *self.state.write() = Some(DebouncedState { value: level, since: now });

            let (stop_tx, stop_rx) = watch::channel(false);
            *lifecycle = Lifecycle::Running { stop_tx };
            (TransitionEvent { value: level, timestamp: now }, stop_rx)
        };

        info!(
            pin = %self.pin,
            sampler = %self.sampler.name(),
            poll_interval_ms = %self.poll_interval.as_millis(),
            value = %initial.value,
            meaning = %initial.value.meaning(),
            "beam_watcher_started"
        );

        self.metrics.record_transition();
        if let Err(fault) = dispatch(&on_change, initial) {
            self.metrics.record_callback_fault();
            error!(pin = %self.pin, error = %fault, "beam_callback_fault");
        }

        let poll_loop = PollLoop {
            pin: self.pin,
            poll_interval: self.poll_interval,
            sampler: self.sampler.clone(),
            state: self.state.clone(),
            debouncer: Debouncer::new(initial.value),
            on_change,
            metrics: self.metrics.clone(),
        };
        tokio::spawn(poll_loop.run(stop_rx));
        true
    }

    /// Signal the polling loop to stop. Returns `false` if already stopped.
    /// Does not wait for the loop to exit.
    pub fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Running { stop_tx } => {
                let _ = stop_tx.send(true);
                info!(pin = %self.pin, "beam_watcher_stopped");
                true
            }
            Lifecycle::Stopped => false,
        }
    }

    /// Stop and release the input line
    pub fn cleanup(&self) {
        self.stop();
        self.sampler.release();
    }
}

impl Drop for BeamWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop {
    pin: u32,
    poll_interval: Duration,
    sampler: Arc<dyn Sampler>,
    state: Arc<RwLock<Option<DebouncedState>>>,
    debouncer: Debouncer,
    on_change: OnChange,
    metrics: Arc<Metrics>,
}

impl PollLoop {
    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        // First sample is one interval after the initial reading
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    // Sender dropped counts as stop
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let sample = self.sampler.sample();
            self.metrics.record_sample();

            match self.debouncer.observe(sample) {
                Observation::Steady => {
                    trace!(pin = %self.pin, value = %sample, "beam_poll");
                }
                Observation::Pending(level) => {
                    trace!(pin = %self.pin, value = %level, "beam_pending");
                }
                Observation::Rejected(level) => {
                    self.metrics.record_glitch();
                    debug!(pin = %self.pin, value = %level, "beam_glitch_suppressed");
                }
                Observation::Confirmed(level) => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    self.confirm(level, Local::now());
                }
            }
        }

        info!(pin = %self.pin, "beam_poll_loop_exited");
    }

    fn confirm(&self, level: SensorLevel, now: Timestamp) {
        *self.state.write() = Some(DebouncedState { value: level, since: now });
        self.metrics.record_transition();

        info!(
            pin = %self.pin,
            value = %level,
            meaning = %level.meaning(),
            "beam_transition"
        );

        if let Err(fault) = dispatch(&self.on_change, TransitionEvent { value: level, timestamp: now }) {
            self.metrics.record_callback_fault();
            error!(pin = %self.pin, error = %fault, "beam_callback_fault");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::gpio::FixedSampler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (OnChange, Arc<Mutex<Vec<TransitionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (Arc::new(move |event| sink.lock().push(event)), events)
    }

    fn watcher(sampler: Arc<FixedSampler>) -> (BeamWatcher, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (BeamWatcher::new(27, DEFAULT_POLL_INTERVAL, sampler, metrics.clone()), metrics)
    }

    #[test]
    fn test_meaning_mapping() {
        assert_eq!(BeamWatcher::meaning(SensorLevel::Asserted), "BLOCKED");
        assert_eq!(BeamWatcher::meaning(SensorLevel::Released), "CLEAR");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reports_initial_reading_synchronously() {
        let sampler = Arc::new(FixedSampler::new(SensorLevel::Asserted));
        let (watcher, _) = watcher(sampler);
        let (on_change, events) = recorder();

        assert!(watcher.current_state().is_none());
        assert!(watcher.start(on_change));

        let events = events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, SensorLevel::Asserted);
        assert_eq!(watcher.current_state().map(|s| s.value), Some(SensorLevel::Asserted));
        assert_eq!(watcher.lifecycle(), EngineLifecycle::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_noop() {
        let sampler = Arc::new(FixedSampler::default());
        let (watcher, metrics) = watcher(sampler);
        let (on_change, events) = recorder();

        assert!(watcher.start(on_change.clone()));
        assert!(!watcher.start(on_change));
        tokio::time::sleep(Duration::from_millis(105)).await;

        assert_eq!(events.lock().len(), 1);
        // One loop: 5 ticks in 105ms, not 10
        assert_eq!(metrics.report().samples_total, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_stop() {
        let sampler = Arc::new(FixedSampler::default());
        let (watcher, _) = watcher(sampler.clone());
        let (on_change, events) = recorder();

        watcher.start(on_change);
        assert!(watcher.stop());
        assert!(!watcher.stop());

        sampler.set_level(SensorLevel::Asserted);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(events.lock().len(), 1);
        assert_eq!(watcher.lifecycle(), EngineLifecycle::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_after_two_polls() {
        let sampler = Arc::new(FixedSampler::default());
        let (watcher, _) = watcher(sampler.clone());
        let (on_change, events) = recorder();
        watcher.start(on_change);

        sampler.set_level(SensorLevel::Asserted);
        // Tick at 20ms sees the candidate, tick at 40ms confirms it
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(events.lock().len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, SensorLevel::Asserted);
        assert_eq!(watcher.current_state().map(|s| s.value), Some(SensorLevel::Asserted));
        watcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_panic_does_not_kill_loop() {
        let sampler = Arc::new(FixedSampler::default());
        let (watcher, metrics) = watcher(sampler.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let on_change: OnChange = Arc::new(move |_: TransitionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("consumer bug");
        });

        watcher.start(on_change);
        sampler.set_level(SensorLevel::Asserted);
        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.set_level(SensorLevel::Released);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.report().callback_faults_total, 3);
        assert!(watcher.is_running());
        watcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let sampler = Arc::new(FixedSampler::default());
        let (watcher, _) = watcher(sampler.clone());
        let (on_change, events) = recorder();

        watcher.start(on_change.clone());
        watcher.stop();
        sampler.set_level(SensorLevel::Asserted);
        assert!(watcher.start(on_change));

        let events = events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, SensorLevel::Asserted);
        watcher.stop();
    }
}

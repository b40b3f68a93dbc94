//! Delivery pipeline - shapes engine transitions and heartbeats into
//! outbound messages and hands them to the delivery worker
//!
//! All mutable state (`destination`, `last_value`, `last_event`, `running`)
//! lives behind one mutex. Messages are composed under the lock and enqueued
//! after it is released; the network send happens on the worker.

use crate::domain::types::{format_ts, OutboundMessage, SensorLevel, Timestamp, TransitionEvent};
use crate::infra::config::normalize_url;
use crate::infra::metrics::Metrics;
use crate::services::delivery_worker::Delivery;
use crate::services::engine::{BeamWatcher, OnChange};
use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Level reported by heartbeats before any reading exists
pub const HEARTBEAT_DEFAULT_LEVEL: SensorLevel = SensorLevel::Released;

#[derive(Debug, Default)]
struct PipelineState {
    destination: Option<String>,
    last_value: Option<SensorLevel>,
    last_event: Option<Timestamp>,
    running: bool,
}

/// Read-only view for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub value: Option<u8>,
    pub meaning: Option<&'static str>,
    pub last_event: Option<String>,
    pub url: Option<String>,
    pub pin: u32,
    pub device: String,
}

/// State and outbox shared with the engine callback
struct Shared {
    pin: u32,
    device: String,
    state: Mutex<PipelineState>,
    outbox: mpsc::Sender<Delivery>,
    metrics: Arc<Metrics>,
}

impl Shared {
    fn on_transition(&self, event: TransitionEvent) {
        let delivery = {
            let mut state = self.state.lock();
            state.last_value = Some(event.value);
            state.last_event = Some(event.timestamp);

            let Some(url) = state.destination.clone() else {
                debug!(value = %event.value, "transition_not_sent_no_destination");
                return;
            };
            Delivery {
                url,
                message: OutboundMessage::transition(
                    event.value,
                    &event.timestamp,
                    self.pin,
                    &self.device,
                ),
                enqueued_at: Instant::now(),
            }
        };
        self.enqueue(delivery);
    }

    fn heartbeat_tick(&self) -> bool {
        let delivery = {
            let mut state = self.state.lock();
            let Some(url) = state.destination.clone() else {
                return false;
            };
            if !state.running {
                return false;
            }
            // Heartbeats refresh the reported value and event time
            let value = state.last_value.unwrap_or(HEARTBEAT_DEFAULT_LEVEL);
            let now = Local::now();
            state.last_value = Some(value);
            state.last_event = Some(now);
            Delivery {
                url,
                message: OutboundMessage::heartbeat(value, &now, self.pin, &self.device),
                enqueued_at: Instant::now(),
            }
        };
        self.metrics.record_heartbeat();
        debug!(value = %delivery.message.value, "heartbeat_composed");
        self.enqueue(delivery);
        true
    }

    /// Hand a delivery to the worker without waiting
    fn enqueue(&self, delivery: Delivery) {
        let event = delivery.message.event;
        match self.outbox.try_send(delivery) {
            Ok(()) => self.metrics.record_delivery_queued(),
            Err(TrySendError::Full(_)) => {
                self.metrics.record_delivery_dropped();
                warn!(event = %event.as_str(), "delivery_queue_full");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_delivery_dropped();
                warn!(event = %event.as_str(), "delivery_worker_gone");
            }
        }
    }
}

pub struct DeliveryPipeline {
    engine: BeamWatcher,
    shared: Arc<Shared>,
    /// Serializes start/stop so lifecycle and `running` move together
    control: Mutex<()>,
}

impl DeliveryPipeline {
    pub fn new(
        engine: BeamWatcher,
        device: impl Into<String>,
        destination: Option<String>,
        outbox: mpsc::Sender<Delivery>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let state = PipelineState {
            destination: destination.as_deref().and_then(normalize_url),
            ..Default::default()
        };
        let shared = Arc::new(Shared {
            pin: engine.pin(),
            device: device.into(),
            state: Mutex::new(state),
            outbox,
            metrics,
        });
        Self { engine, shared, control: Mutex::new(()) }
    }

    pub fn engine(&self) -> &BeamWatcher {
        &self.engine
    }

    /// Record a transition and, if a destination is set, queue it for sending
    pub fn on_transition(&self, value: SensorLevel, timestamp: Timestamp) {
        self.shared.on_transition(TransitionEvent { value, timestamp });
    }

    /// Queue a heartbeat if running with a destination. Returns whether one
    /// was queued.
    pub fn heartbeat_tick(&self) -> bool {
        self.shared.heartbeat_tick()
    }

    /// Replace the destination; blank clears it. Affects subsequent sends only.
    pub fn set_destination(&self, url: Option<&str>) {
        let destination = url.and_then(normalize_url);
        info!(url = ?destination, "destination_set");
        self.shared.state.lock().destination = destination;
    }

    /// Start monitoring. Updates the destination if `url` is given; no-op
    /// otherwise when already running. Returns the status after the call.
    pub fn start(&self, url: Option<&str>) -> MonitorStatus {
        let _control = self.control.lock();
        if let Some(url) = url {
            self.set_destination(Some(url));
        }

        if self.shared.state.lock().running {
            return self.status();
        }

        let shared = self.shared.clone();
        let on_change: OnChange = Arc::new(move |event: TransitionEvent| shared.on_transition(event));
        // Initial reading is delivered by the engine's synchronous callback
        self.engine.start(on_change);
        self.shared.state.lock().running = true;

        info!(pin = %self.shared.pin, device = %self.shared.device, "monitoring_started");
        self.status()
    }

    /// Stop monitoring. Safe to call when already stopped.
    pub fn stop(&self) -> MonitorStatus {
        let _control = self.control.lock();
        self.engine.stop();
        let was_running = std::mem::replace(&mut self.shared.state.lock().running, false);
        if was_running {
            info!(pin = %self.shared.pin, "monitoring_stopped");
        }
        self.status()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn destination(&self) -> Option<String> {
        self.shared.state.lock().destination.clone()
    }

    pub fn last_value(&self) -> Option<SensorLevel> {
        self.shared.state.lock().last_value
    }

    pub fn last_event(&self) -> Option<Timestamp> {
        self.shared.state.lock().last_event
    }

    /// Consistent snapshot of the monitor state
    pub fn status(&self) -> MonitorStatus {
        let state = self.shared.state.lock();
        MonitorStatus {
            running: state.running,
            value: state.last_value.map(SensorLevel::raw),
            meaning: state.last_value.map(SensorLevel::meaning),
            last_event: state.last_event.as_ref().map(format_ts),
            url: state.destination.clone(),
            pin: self.shared.pin,
            device: self.shared.device.clone(),
        }
    }

    /// Tick `heartbeat_tick` every `period` until shutdown. The timer keeps
    /// running while monitoring is stopped; those ticks send nothing.
    pub async fn run_heartbeat(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(period_secs = %period.as_secs(), "heartbeat_timer_started");
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately; skip it so the first beat is one period in
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat_timer_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if self.heartbeat_tick() {
                        info!(pin = %self.shared.pin, "heartbeat_sent");
                    }
                }
            }
        }
    }
}

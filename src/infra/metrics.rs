//! Lock-free metrics collection
//!
//! Counters are plain atomics so the polling loop and the delivery worker can
//! record without contending on a lock. `report()` takes a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector. All counters are monotonic.
pub struct Metrics {
    /// Raw samples taken by the polling loop
    samples_total: AtomicU64,
    /// Confirmed transitions, including initial readings
    transitions_total: AtomicU64,
    /// Single-poll glitches rejected by the debouncer
    glitches_suppressed_total: AtomicU64,
    /// Consumer callbacks that panicked
    callback_faults_total: AtomicU64,
    /// Messages handed to the delivery worker
    deliveries_queued_total: AtomicU64,
    /// Messages the collector accepted
    deliveries_sent_total: AtomicU64,
    /// Messages that failed (network, timeout, non-2xx)
    deliveries_failed_total: AtomicU64,
    /// Messages dropped because the delivery queue was full
    deliveries_dropped_total: AtomicU64,
    /// Heartbeat messages composed
    heartbeats_total: AtomicU64,
    /// Sum of send latencies in microseconds
    send_latency_sum_us: AtomicU64,
    /// Max send latency in microseconds
    send_latency_max_us: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub transitions_total: u64,
    pub glitches_suppressed_total: u64,
    pub callback_faults_total: u64,
    pub deliveries_queued_total: u64,
    pub deliveries_sent_total: u64,
    pub deliveries_failed_total: u64,
    pub deliveries_dropped_total: u64,
    pub heartbeats_total: u64,
    pub send_latency_avg_us: u64,
    pub send_latency_max_us: u64,
    pub uptime_secs: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured line
    pub fn log(&self) {
        info!(
            samples = %self.samples_total,
            transitions = %self.transitions_total,
            glitches = %self.glitches_suppressed_total,
            callback_faults = %self.callback_faults_total,
            sent = %self.deliveries_sent_total,
            failed = %self.deliveries_failed_total,
            dropped = %self.deliveries_dropped_total,
            heartbeats = %self.heartbeats_total,
            send_avg_us = %self.send_latency_avg_us,
            send_max_us = %self.send_latency_max_us,
            uptime_secs = %self.uptime_secs,
            "metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            transitions_total: AtomicU64::new(0),
            glitches_suppressed_total: AtomicU64::new(0),
            callback_faults_total: AtomicU64::new(0),
            deliveries_queued_total: AtomicU64::new(0),
            deliveries_sent_total: AtomicU64::new(0),
            deliveries_failed_total: AtomicU64::new(0),
            deliveries_dropped_total: AtomicU64::new(0),
            heartbeats_total: AtomicU64::new(0),
            send_latency_sum_us: AtomicU64::new(0),
            send_latency_max_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition(&self) {
        self.transitions_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_glitch(&self) {
        self.glitches_suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_callback_fault(&self) {
        self.callback_faults_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_queued(&self) {
        self.deliveries_queued_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_dropped(&self) {
        self.deliveries_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed send and its latency
    pub fn record_delivery_sent(&self, latency_us: u64) {
        self.deliveries_sent_total.fetch_add(1, Ordering::Relaxed);
        self.record_send_latency(latency_us);
    }

    /// Record a failed send and its latency
    pub fn record_delivery_failed(&self, latency_us: u64) {
        self.deliveries_failed_total.fetch_add(1, Ordering::Relaxed);
        self.record_send_latency(latency_us);
    }

    fn record_send_latency(&self, latency_us: u64) {
        self.send_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.send_latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    /// Snapshot all counters
    pub fn report(&self) -> MetricsSummary {
        let sent = self.deliveries_sent_total.load(Ordering::Relaxed);
        let failed = self.deliveries_failed_total.load(Ordering::Relaxed);
        let attempts = sent + failed;
        let latency_sum = self.send_latency_sum_us.load(Ordering::Relaxed);

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            transitions_total: self.transitions_total.load(Ordering::Relaxed),
            glitches_suppressed_total: self.glitches_suppressed_total.load(Ordering::Relaxed),
            callback_faults_total: self.callback_faults_total.load(Ordering::Relaxed),
            deliveries_queued_total: self.deliveries_queued_total.load(Ordering::Relaxed),
            deliveries_sent_total: sent,
            deliveries_failed_total: failed,
            deliveries_dropped_total: self.deliveries_dropped_total.load(Ordering::Relaxed),
            heartbeats_total: self.heartbeats_total.load(Ordering::Relaxed),
            send_latency_avg_us: if attempts > 0 { latency_sum / attempts } else { 0 },
            send_latency_max_us: self.send_latency_max_us.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

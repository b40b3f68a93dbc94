//! Delivery worker - sends outbound messages off the polling path
//!
//! The pipeline enqueues deliveries with `try_send` so a slow or hung
//! collector never stalls sampling. The worker performs each POST with its
//! own timeout. Failures are logged and counted, never retried.

use crate::domain::types::OutboundMessage;
use crate::infra::metrics::Metrics;
use crate::io::collector::{DeliveryError, Transport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A message bound for a specific destination
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Destination at the time the message was composed
    pub url: String,
    pub message: OutboundMessage,
    /// When the delivery was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Worker that performs deliveries sequentially
pub struct DeliveryWorker {
    transport: Arc<dyn Transport>,
    rx: mpsc::Receiver<Delivery>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl DeliveryWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        rx: mpsc::Receiver<Delivery>,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { transport, rx, timeout, metrics }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!(timeout_ms = %self.timeout.as_millis(), "delivery_worker_started");

        while let Some(delivery) = self.rx.recv().await {
            let queue_delay_us = delivery.enqueued_at.elapsed().as_micros() as u64;
            let send_start = Instant::now();

            let result =
                match tokio::time::timeout(self.timeout, self.transport.post(&delivery.url, &delivery.message))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.timeout)),
                };
            let latency_us = send_start.elapsed().as_micros() as u64;

            match result {
                Ok(()) => {
                    self.metrics.record_delivery_sent(latency_us);
                    debug!(
                        event = %delivery.message.event.as_str(),
                        value = %delivery.message.value,
                        queue_delay_us = %queue_delay_us,
                        latency_us = %latency_us,
                        "delivery_sent"
                    );
                }
                Err(e) => {
                    self.metrics.record_delivery_failed(latency_us);
                    warn!(
                        event = %delivery.message.event.as_str(),
                        url = %delivery.url,
                        error = %e,
                        latency_us = %latency_us,
                        "delivery_failed"
                    );
                }
            }
        }

        info!("delivery_worker_stopped");
    }
}

/// Create a delivery channel and worker
///
/// Returns the sender (for the pipeline) and the worker (to be spawned)
pub fn create_delivery_worker(
    transport: Arc<dyn Transport>,
    timeout: Duration,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<Delivery>, DeliveryWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let worker = DeliveryWorker::new(transport, rx, timeout, metrics);
    (tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorLevel;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct StubTransport {
        delay: Duration,
        fail_with_status: Option<u16>,
        posted: Mutex<Vec<(String, OutboundMessage)>>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn post(&self, url: &str, message: &OutboundMessage) -> Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            self.posted.lock().push((url.to_string(), message.clone()));
            match self.fail_with_status {
                Some(status) => Err(DeliveryError::Status(status)),
                None => Ok(()),
            }
        }
    }

    fn delivery() -> Delivery {
        let ts = chrono::Local::now();
        Delivery {
            url: "http://collector/beam".to_string(),
            message: OutboundMessage::transition(SensorLevel::Asserted, &ts, 27, "dev"),
            enqueued_at: Instant::now(),
        }
    }

    async fn run_one(transport: Arc<StubTransport>) -> Arc<Metrics> {
        let metrics = Arc::new(Metrics::new());
        let (tx, worker) =
            create_delivery_worker(transport, Duration::from_secs(4), metrics.clone(), 8);
        tx.send(delivery()).await.unwrap();
        drop(tx);
        worker.run().await;
        metrics
    }

    #[tokio::test]
    async fn test_successful_delivery_counted() {
        let transport = Arc::new(StubTransport {
            delay: Duration::ZERO,
            fail_with_status: None,
            posted: Mutex::new(Vec::new()),
        });
        let metrics = run_one(transport.clone()).await;

        assert_eq!(transport.posted.lock().len(), 1);
        assert_eq!(transport.posted.lock()[0].0, "http://collector/beam");
        assert_eq!(metrics.report().deliveries_sent_total, 1);
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let transport = Arc::new(StubTransport {
            delay: Duration::ZERO,
            fail_with_status: Some(500),
            posted: Mutex::new(Vec::new()),
        });
        let metrics = run_one(transport).await;
        assert_eq!(metrics.report().deliveries_failed_total, 1);
        assert_eq!(metrics.report().deliveries_sent_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_collector_times_out() {
        let transport = Arc::new(StubTransport {
            delay: Duration::from_secs(60),
            fail_with_status: None,
            posted: Mutex::new(Vec::new()),
        });
        let metrics = run_one(transport.clone()).await;

        assert!(transport.posted.lock().is_empty());
        assert_eq!(metrics.report().deliveries_failed_total, 1);
    }
}

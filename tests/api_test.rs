//! Integration tests for the HTTP control API

use async_trait::async_trait;
use beam_agent::domain::{OutboundMessage, SensorLevel};
use beam_agent::infra::Metrics;
use beam_agent::io::{api, DeliveryError, FixedSampler, Transport};
use beam_agent::services::{create_delivery_worker, BeamWatcher, DeliveryPipeline};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct RecordingTransport {
    posted: Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, _url: &str, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.posted.lock().push(message.clone());
        Ok(())
    }
}

struct Server {
    base: String,
    client: reqwest::Client,
    transport: Arc<RecordingTransport>,
    shutdown: watch::Sender<bool>,
}

async fn spawn_server() -> Server {
    let metrics = Arc::new(Metrics::new());
    let sampler = Arc::new(FixedSampler::new(SensorLevel::Released));
    let engine = BeamWatcher::new(27, Duration::from_millis(20), sampler, metrics.clone());
    let transport = Arc::new(RecordingTransport::default());
    let (outbox, worker) =
        create_delivery_worker(transport.clone(), Duration::from_secs(4), metrics.clone(), 64);
    tokio::spawn(worker.run());
    let pipeline = Arc::new(DeliveryPipeline::new(engine, "pi3-nani", None, outbox, metrics.clone()));

    let listener = api::bind("127.0.0.1", 0).await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(api::serve(listener, pipeline, metrics, shutdown_rx));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Server { base, client, transport, shutdown }
}

impl Server {
    async fn get(&self, path: &str) -> (u16, String) {
        let resp = self.client.get(format!("{}{}", self.base, path)).send().await.unwrap();
        (resp.status().as_u16(), resp.text().await.unwrap())
    }

    async fn post(&self, path: &str, body: &str) -> (u16, serde_json::Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap())
    }
}

#[tokio::test]
async fn test_health_before_start() {
    let server = spawn_server().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);

    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["running"], false);
    assert_eq!(body["value"], serde_json::Value::Null);
    assert_eq!(body["meaning"], serde_json::Value::Null);
    assert_eq!(body["url"], serde_json::Value::Null);
    assert_eq!(body["pin"], 27);
    assert_eq!(body["device"], "pi3-nani");
    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn test_start_stop_cycle() {
    let server = spawn_server().await;

    let (status, body) = server.post("/start", r#"{"url":"http://collector/beam"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(body["running"], true);
    assert_eq!(body["url"], "http://collector/beam");

    let (_, health) = server.get("/health").await;
    let health: serde_json::Value = serde_json::from_str(&health).unwrap();
    assert_eq!(health["running"], true);
    assert_eq!(health["value"], 1);
    assert_eq!(health["meaning"], "CLEAR");
    assert!(health["last_event"].is_string());

    // Second start keeps running, no second snapshot
    let (status, _) = server.post("/start", "").await;
    assert_eq!(status, 200);

    let (status, body) = server.post("/stop", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["running"], false);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let posted = server.transport.posted.lock().clone();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].event.as_str(), "CLEAR");
    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn test_invalid_start_body_rejected() {
    let server = spawn_server().await;
    let (status, body) = server.post("/start", "{url:").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_json");

    let (_, health) = server.get("/health").await;
    assert!(health.contains("\"running\":false"));
    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn test_metrics_and_not_found() {
    let server = spawn_server().await;
    let (status, body) = server.get("/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("beam_samples_total{device=\"pi3-nani\"}"));
    assert!(body.contains("beam_running{device=\"pi3-nani\"} 0"));

    let (status, _) = server.get("/nope").await;
    assert_eq!(status, 404);
    let _ = server.shutdown.send(true);
}

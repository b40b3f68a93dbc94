//! HTTP control API
//!
//! - `GET /health` - monitor status as JSON
//! - `POST /start` - start monitoring, optional body `{"url": "..."}`
//! - `POST /stop` - stop monitoring
//! - `GET /metrics` - Prometheus text format
//!
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::pipeline::{DeliveryPipeline, MonitorStatus};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Body of `POST /start`
#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    #[serde(default)]
    url: Option<String>,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with device label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    device: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(
    summary: &MetricsSummary,
    status: &MonitorStatus,
) -> String {
    let device = status.device.as_str();
    let mut output = String::with_capacity(2048);

    let counters = [
        ("beam_samples_total", "Raw samples taken", summary.samples_total),
        ("beam_transitions_total", "Confirmed transitions including initial readings", summary.transitions_total),
        ("beam_glitches_suppressed_total", "Single-poll glitches rejected", summary.glitches_suppressed_total),
        ("beam_callback_faults_total", "Transition callbacks that panicked", summary.callback_faults_total),
        ("beam_deliveries_queued_total", "Messages queued for delivery", summary.deliveries_queued_total),
        ("beam_deliveries_sent_total", "Messages accepted by the collector", summary.deliveries_sent_total),
        ("beam_deliveries_failed_total", "Messages that failed to deliver", summary.deliveries_failed_total),
        ("beam_deliveries_dropped_total", "Messages dropped on a full queue", summary.deliveries_dropped_total),
        ("beam_heartbeats_total", "Heartbeat messages composed", summary.heartbeats_total),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, device, val);
    }

    write_metric(
        &mut output,
        "beam_send_latency_avg_us",
        "Average delivery latency in microseconds",
        MetricType::Gauge,
        device,
        summary.send_latency_avg_us,
    );
    write_metric(
        &mut output,
        "beam_send_latency_max_us",
        "Maximum delivery latency in microseconds",
        MetricType::Gauge,
        device,
        summary.send_latency_max_us,
    );
    write_metric(
        &mut output,
        "beam_running",
        "Monitoring active (1) or stopped (0)",
        MetricType::Gauge,
        device,
        status.running as u64,
    );
    if let Some(value) = status.value {
        write_metric(
            &mut output,
            "beam_level",
            "Last confirmed level (0=BLOCKED, 1=CLEAR)",
            MetricType::Gauge,
            device,
            value as u64,
        );
    }

    output
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn health_body(status: &MonitorStatus) -> serde_json::Value {
    let mut body = serde_json::to_value(status).unwrap_or_default();
    if let Some(map) = body.as_object_mut() {
        map.insert("ok".to_string(), serde_json::Value::Bool(true));
    }
    body
}

/// Parse the optional `POST /start` body. Empty body means no URL change.
fn parse_start_request(body: &[u8]) -> Result<StartRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRequest::default());
    }
    serde_json::from_slice(body)
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    pipeline: Arc<DeliveryPipeline>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    match (req.method().clone(), path.as_str()) {
        (Method::GET, "/health") => {
            Ok(json_response(StatusCode::OK, health_body(&pipeline.status())))
        }
        (Method::POST, "/start") => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "api_body_read_failed");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        serde_json::json!({"ok": false, "error": "body_read_failed"}),
                    ));
                }
            };
            let start = match parse_start_request(&body) {
                Ok(start) => start,
                Err(e) => {
                    warn!(error = %e, "api_invalid_start_body");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        serde_json::json!({"ok": false, "error": "invalid_json"}),
                    ));
                }
            };
            let status = pipeline.start(start.url.as_deref());
            info!(url = ?status.url, "api_start");
            Ok(json_response(
                StatusCode::OK,
                serde_json::json!({"running": status.running, "url": status.url}),
            ))
        }
        (Method::POST, "/stop") => {
            let status = pipeline.stop();
            info!("api_stop");
            Ok(json_response(StatusCode::OK, serde_json::json!({"running": status.running})))
        }
        (Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.report(), &pipeline.status());
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Bind the control API listener
pub async fn bind(bind_address: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((bind_address, port)).await
}

/// Serve the control API on `listener` until shutdown
pub async fn serve(
    listener: TcpListener,
    pipeline: Arc<DeliveryPipeline>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(addr = %addr, "control_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let pipeline = pipeline.clone();
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let pipeline = pipeline.clone();
                                let metrics = metrics.clone();
                                async move { handle_request(req, pipeline, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "control_api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(value: Option<u8>) -> MonitorStatus {
        MonitorStatus {
            running: true,
            value,
            meaning: value.map(|v| if v == 0 { "BLOCKED" } else { "CLEAR" }),
            last_event: None,
            url: Some("http://c/beam".to_string()),
            pin: 27,
            device: "pi3-nani".to_string(),
        }
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_sample();
        metrics.record_transition();
        metrics.record_delivery_sent(120);

        let output = format_prometheus_metrics(&metrics.report(), &status(Some(0)));

        assert!(output.contains("beam_samples_total{device=\"pi3-nani\"} 1"));
        assert!(output.contains("beam_deliveries_sent_total{device=\"pi3-nani\"} 1"));
        assert!(output.contains("# TYPE beam_running gauge"));
        assert!(output.contains("beam_level{device=\"pi3-nani\"} 0"));
    }

    #[test]
    fn test_level_omitted_before_first_reading() {
        let output = format_prometheus_metrics(&Metrics::new().report(), &status(None));
        assert!(!output.contains("beam_level"));
    }

    #[test]
    fn test_health_body_shape() {
        let body = health_body(&status(Some(1)));
        assert_eq!(body["ok"], true);
        assert_eq!(body["running"], true);
        assert_eq!(body["value"], 1);
        assert_eq!(body["meaning"], "CLEAR");
        assert_eq!(body["last_event"], serde_json::Value::Null);
        assert_eq!(body["pin"], 27);
    }

    #[test]
    fn test_parse_start_request() {
        assert!(parse_start_request(b"").unwrap().url.is_none());
        assert!(parse_start_request(b"  \n").unwrap().url.is_none());
        assert!(parse_start_request(b"{}").unwrap().url.is_none());
        assert_eq!(
            parse_start_request(br#"{"url":"http://x/y"}"#).unwrap().url.as_deref(),
            Some("http://x/y")
        );
        assert!(parse_start_request(b"{not json").is_err());
    }
}

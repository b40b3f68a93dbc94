//! Beam agent - watches an IR beam-break sensor and reports to a collector
//!
//! Module structure:
//! - `domain/` - Sensor levels, transitions, wire messages
//! - `io/` - External interfaces (GPIO, collector HTTP, control API, CSV log)
//! - `services/` - Debounce engine, delivery worker, delivery pipeline
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use beam_agent::infra::{Config, Metrics};
use beam_agent::io::{api, HttpCollector};
use beam_agent::services::{create_delivery_worker, BeamWatcher, DeliveryPipeline};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Beam agent - debounced beam-break monitoring with HTTP delivery
#[derive(Parser, Debug)]
#[command(name = "beam-agent", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Start monitoring immediately instead of waiting for POST /start
    #[arg(long)]
    start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for delivery details, trace for every poll
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "beam-agent starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        device = %config.device(),
        pin = %config.pin(),
        poll_interval_ms = %config.poll_interval().as_millis(),
        sampler = ?config.sampler_backend(),
        url = ?config.url(),
        heartbeat_secs = %config.heartbeat_interval().as_secs(),
        api_port = %config.api_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let sampler = beam_agent::init_sampler(&config)
        .await
        .with_context(|| format!("failed to initialize gpio pin {}", config.pin()))?;
    let engine = BeamWatcher::new(config.pin(), config.poll_interval(), sampler, metrics.clone());

    // Delivery worker keeps network I/O off the polling loop
    let transport = Arc::new(HttpCollector::new(config.delivery_timeout())?);
    let (outbox, worker) = create_delivery_worker(
        transport,
        config.delivery_timeout(),
        metrics.clone(),
        config.delivery_queue_size(),
    );
    tokio::spawn(worker.run());

    let pipeline = Arc::new(DeliveryPipeline::new(
        engine,
        config.device(),
        config.url().map(String::from),
        outbox,
        metrics.clone(),
    ));

    // Heartbeat timer runs for the life of the process
    tokio::spawn(pipeline.clone().run_heartbeat(config.heartbeat_interval(), shutdown_rx.clone()));

    // Periodic metrics summary
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
            loop {
                interval.tick().await;
                metrics_clone.report().log();
            }
        });
    }

    if config.api_port() > 0 {
        let listener = api::bind(config.api_bind_address(), config.api_port())
            .await
            .with_context(|| {
                format!("failed to bind {}:{}", config.api_bind_address(), config.api_port())
            })?;
        let api_pipeline = pipeline.clone();
        let api_metrics = metrics.clone();
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(listener, api_pipeline, api_metrics, api_shutdown).await {
                tracing::error!(error = %e, "control API error");
            }
        });
    }

    if args.start {
        pipeline.start(None);
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    pipeline.stop();
    pipeline.engine().cleanup();

    info!("beam-agent shutdown complete");
    Ok(())
}

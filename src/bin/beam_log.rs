//! Local beam recorder
//!
//! Runs the beam watcher without any network delivery. Prints every reading
//! and appends it to a CSV file. Ctrl+C to stop.

use beam_agent::domain::types::TransitionEvent;
use beam_agent::infra::{Config, Metrics};
use beam_agent::io::EventLog;
use beam_agent::services::{BeamWatcher, OnChange};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "beam-log", version, about = "Record beam transitions to CSV")]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// CSV output file (overrides config and LOGFILE)
    #[arg(long)]
    csv: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));
    let csv_path = args.csv.unwrap_or_else(|| config.event_log_file().to_string());

    let sampler = beam_agent::init_sampler(&config).await?;
    let metrics = Arc::new(Metrics::new());
    let watcher = BeamWatcher::new(config.pin(), config.poll_interval(), sampler, metrics.clone());
    let event_log = EventLog::new(&csv_path, config.pin());

    info!(
        pin = %watcher.pin(),
        poll_interval_ms = %watcher.poll_interval().as_millis(),
        csv = %csv_path,
        "watching (0=BLOCKED, 1=CLEAR), Ctrl+C to stop"
    );

    let first = AtomicBool::new(true);
    let on_change: OnChange = Arc::new(move |event: TransitionEvent| {
        let label = if first.swap(false, Ordering::Relaxed) { "start" } else { "changed" };
        info!("{} -> {} ({})", label, event.value, event.value.meaning());
        event_log.record(&event);
    });
    watcher.start(on_change);

    tokio::signal::ctrl_c().await.ok();
    watcher.cleanup();
    metrics.report().log();
    Ok(())
}

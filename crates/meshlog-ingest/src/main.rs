//! meshlog live ingestion daemon.
//!
//! Connects to a mesh radio device over TCP, receives telemetry events in
//! real time, and persists them into a normalized SQLite store.
//!
//! # Usage
//!
//! ```bash
//! # Run against a device on the local network
//! meshlog-ingest --device-addr 192.168.1.50:4403 --database-url sqlite://meshlog.db
//!
//! # Replay a captured frame stream instead of connecting
//! meshlog-ingest --backfill capture.jsonl
//! ```
//!
//! The daemon runs until terminated. Under systemd it announces `READY=1`
//! once the first device session is up and pulses `WATCHDOG=1` while idle;
//! connection loss is retried forever with the configured delays.

use anyhow::{Context, Result};
use clap::Parser;
use meshlog_ingest::{
    Database, Dispatcher, IngestConfig, JsonlSource, Supervisor, SystemdNotifier,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// meshlog live ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "meshlog-ingest")]
#[command(about = "Mesh telemetry ingestion daemon")]
#[command(version)]
struct Args {
    /// Device TCP address (host:port)
    #[arg(long, env = "MESHLOG_DEVICE_ADDR", default_value = "127.0.0.1:4403")]
    device_addr: String,

    /// SQLite database URL
    #[arg(long, env = "MESHLOG_DATABASE_URL", default_value = "sqlite://meshlog.db")]
    database_url: String,

    /// Connection establishment timeout in seconds
    #[arg(long, default_value = "30")]
    connect_timeout: u64,

    /// Delay in seconds before reconnecting after a transport failure
    #[arg(long, default_value = "5")]
    reconnect_delay: u64,

    /// Delay in seconds before reconnecting after an unexpected failure
    #[arg(long, default_value = "5")]
    error_retry_delay: u64,

    /// Seconds between watchdog liveness pulses
    #[arg(long, default_value = "10")]
    watchdog_period: u64,

    /// Node identifier recorded as the destination of synthesized direct
    /// traceroutes
    #[arg(long, default_value = "15")]
    direct_dest_id: i64,

    /// Replay a JSONL packet capture instead of connecting to a device
    #[arg(long)]
    backfill: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("meshlog_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("meshlog ingestion daemon starting...");

    let db = Database::open(&args.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", args.database_url))?;
    db.init_schema()
        .await
        .context("Failed to create database schema")?;

    let config = IngestConfig {
        device_addr: args.device_addr.clone(),
        connect_timeout: Duration::from_secs(args.connect_timeout),
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        error_retry_delay: Duration::from_secs(args.error_retry_delay),
        watchdog_period: Duration::from_secs(args.watchdog_period),
        direct_dest_id: args.direct_dest_id,
    };

    tracing::info!("Configuration:");
    tracing::info!("  Device:   {}", config.device_addr);
    tracing::info!("  Database: {}", args.database_url);
    tracing::info!("  Reconnect delay: {}s", args.reconnect_delay);
    tracing::info!("  Watchdog period: {}s", args.watchdog_period);
    tracing::info!("  Direct traceroute destination: {}", config.direct_dest_id);

    let dispatcher = Arc::new(Dispatcher::new(db, config.direct_dest_id));

    if let Some(path) = &args.backfill {
        return run_backfill(path, &dispatcher).await;
    }

    let supervisor = Supervisor::new(config, Arc::clone(&dispatcher), SystemdNotifier::from_env());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping...");
        }
        result = supervisor.run() => {
            result.context("supervisor exited")?;
        }
    }

    let stats = dispatcher.stats();
    tracing::info!("Shutdown complete");
    tracing::info!("  Events received:  {}", stats.received);
    tracing::info!("  Committed:        {}", stats.committed);
    tracing::info!("  Rejected:         {}", stats.rejected);
    tracing::info!("  Failed:           {}", stats.failed);
    tracing::info!("  Ignored:          {}", stats.ignored);

    Ok(())
}

/// Feed every packet from a capture file through the pipeline.
async fn run_backfill(path: &Path, dispatcher: &Dispatcher) -> Result<()> {
    tracing::info!("Replaying packet capture from {}", path.display());

    let mut source = JsonlSource::open(path)
        .with_context(|| format!("Failed to open capture {}", path.display()))?;

    while let Some(packet) = source.next_packet().context("capture read failed")? {
        dispatcher.dispatch(&packet).await;
    }

    let read = source.stats();
    let stats = dispatcher.stats();
    tracing::info!("Backfill complete");
    tracing::info!("  Lines read:     {}", read.lines);
    tracing::info!("  Lines skipped:  {}", read.skipped);
    tracing::info!("  Committed:      {}", stats.committed);
    tracing::info!("  Rejected:       {}", stats.rejected);
    tracing::info!("  Failed:         {}", stats.failed);
    tracing::info!("  Ignored:        {}", stats.ignored);

    Ok(())
}

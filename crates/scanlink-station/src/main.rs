//! Scanlink Station - simulated scanner service.
//!
//! Serves the Scanlink wire protocol backed by a synthetic scanner, so the
//! deferred capture workflow can be exercised without hardware.

use anyhow::{Context, Result};
use clap::Parser;
use scanlink_proto::{DEFAULT_MAX_FRAME_LENGTH, DEFAULT_PORT, DEFAULT_SERVICE};
use scanlink_station::{serve, ScannerService, StationConfig, SyntheticConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scanlink Station - simulated scanner service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address (default: all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Service name clients must request
    #[arg(short, long, default_value = DEFAULT_SERVICE)]
    service: String,

    /// Preparation worker threads (default: available parallelism)
    #[arg(short, long, env = "SCANLINK_STATION_WORKERS")]
    workers: Option<usize>,

    /// Longest a prepare notification blocks, in milliseconds
    #[arg(long, default_value = "5000")]
    heartbeat_ms: u64,

    /// Fail reconstruction of every k-th frame (0 = never)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Artificial reconstruction latency per frame, in milliseconds
    #[arg(long, default_value = "0")]
    reconstruct_delay_ms: u64,

    /// Largest frame sent or accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LENGTH)]
    max_frame_length: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let filter = if args.debug {
        "debug,scanlink_station=trace"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = StationConfig {
        service_name: args.service,
        heartbeat: Duration::from_millis(args.heartbeat_ms),
        max_frame_length: args.max_frame_length,
        ..Default::default()
    };
    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }
        config.workers = workers;
    }

    let scanner = SyntheticConfig {
        fail_every: args.fail_every,
        reconstruct_delay: Duration::from_millis(args.reconstruct_delay_ms),
        ..Default::default()
    };

    info!("Scanlink Station v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Preparation pool: {} workers, heartbeat {:?}",
        config.workers, config.heartbeat
    );
    if args.fail_every > 0 {
        info!("Failing reconstruction of every {} frames", args.fail_every);
    }

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let service = ScannerService::synthetic(scanner, config);

    tokio::select! {
        result = serve(listener, service) => result.context("Scanner service failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

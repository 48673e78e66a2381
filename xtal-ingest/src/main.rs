//! xtal-ingest - Crystal plate ingester
//!
//! Watches the imager's plate directories, reconciles barcodes against the
//! plate registry and copies finished plates into their visit archive.
//!
//! Configuration file resolution:
//! 1. `--config <path>`
//! 2. `XTAL_INGEST_CONFIG`
//! 3. `~/.config/xtal/ingest.toml`

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use xtal_common::config::{resolve_config_path, IngestConfig, StartAs};
use xtal_ingest::{build_router, logging, AppState, ExecutionContext};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(version, about = "Crystal plate ingester")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "XTAL_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port (overrides [http] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Where the collector runs: task, thread or process (overrides [collector] start_as)
    #[arg(long)]
    start_as: Option<StartAs>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref())?;
    let mut config = IngestConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if let Some(port) = args.port {
        config.http.port = port;
    }
    if let Some(start_as) = args.start_as {
        config.collector.start_as = start_as;
    }

    let _log_guard = logging::init(&config.logging);

    info!("Starting xtal-ingest {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());
    info!("Database: {}", config.database_path.display());
    info!(
        "Collector: {:?} as {}, {} source director{}",
        config.collector.kind,
        config.collector.start_as,
        config.collector.source_directories.len(),
        if config.collector.source_directories.len() == 1 { "y" } else { "ies" }
    );

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.http.host, config.http.port))?;

    let mut context = ExecutionContext::new(config.clone(), config.collector.start_as);
    context
        .start()
        .await
        .context("Failed to start collector")?;

    let state = AppState::new(context);
    let shutdown = state.shutdown.clone();
    let context = state.context.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    info!("HTTP server stopped, stopping collector");
    context.write().await.stop().await?;
    info!("Shutdown complete");

    Ok(())
}

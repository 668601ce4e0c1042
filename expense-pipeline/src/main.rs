//! expense-pipeline - receipt processing service
//!
//! Accepts uploaded receipts over HTTP and runs each through extraction,
//! normalization and enrichment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use expense_common::blob::open_blob_store;
use expense_common::config::{ConfigSource, TomlConfig};
use expense_common::db::open_record_store;
use expense_common::events::EventBus;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use expense_pipeline::dispatch::{Dispatcher, PipelineContext};
use expense_pipeline::enrich::Enricher;
use expense_pipeline::extraction::{build_provider, ResultPoller};
use expense_pipeline::{build_router, AppState};

/// Command-line arguments for expense-pipeline
#[derive(Parser, Debug)]
#[command(name = "expense-pipeline")]
#[command(about = "Receipt extraction and enrichment pipeline")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `[server] bind`
    #[arg(short, long, env = "EXPENSE_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting expense-pipeline v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "Configuration loaded"),
        ConfigSource::Defaults => warn!("No configuration file found, using defaults"),
    }

    let records = open_record_store(&config.database)
        .await
        .context("Failed to open record store")?;
    let blobs = open_blob_store(&config.store)
        .await
        .context("Failed to open blob store")?;

    let processor = config
        .processor
        .as_ref()
        .context("No [processor] section configured")?;
    let provider =
        build_provider(processor, blobs.clone()).context("Failed to configure extraction provider")?;

    let enricher = Enricher::from_config(config.currency.as_ref(), config.translation.as_ref())
        .context("Failed to configure post-processors")?;

    let poller = ResultPoller::new(blobs.clone())
        .with_max_attempts(config.pipeline.max_poll_attempts)
        .with_unit(Duration::from_millis(config.pipeline.poll_unit_ms));

    let event_bus = EventBus::new(1000);
    let ctx = PipelineContext::new(records.clone(), blobs.clone(), provider, poller)
        .with_enricher(enricher)
        .with_event_bus(event_bus);
    let dispatcher = Dispatcher::start(ctx);

    let state = AppState::new(records, blobs, dispatcher.clone())
        .with_max_upload_bytes(config.server.max_upload_bytes);
    let app = build_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, draining pipeline");
    let timeout = Duration::from_millis(config.pipeline.shutdown_timeout_ms);
    if let Err(e) = dispatcher.shutdown(timeout).await {
        error!(error = %e, "Pipeline did not drain cleanly");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aedes_ingest::api::{self, AppState};
use aedes_ingest::blob_store::S3BlobStore;
use aedes_ingest::config::Config;
use aedes_ingest::document_store::PostgresDocumentStore;
use aedes_ingest::ingest::Ingestor;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Aedes ingestion service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize stores
    let documents = Arc::new(
        PostgresDocumentStore::new(&config.database)
            .await
            .context("Failed to initialize document store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        documents
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let blob_store = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize blob store")?,
    );

    let state = AppState {
        ingestor: Arc::new(Ingestor::new(blob_store, documents.clone())),
        documents,
    };

    // Serve until SIGINT/SIGTERM
    api::start_api_server(state, &config.http, shutdown_signal()).await?;

    info!("Ingestion service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

//! HTTP surface: the report endpoint, health probes and CORS.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::HttpConfig;
use crate::document_store::DocumentStore;
use crate::error::IngestError;
use crate::ingest::Ingestor;
use crate::multipart::MultipartForm;
use crate::records::ReportAck;
use crate::report::SensorReport;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub documents: Arc<dyn DocumentStore>,
}

/// Create the API router
///
/// Every response carries `Access-Control-Allow-Origin: *`, and any
/// `OPTIONS` request is answered as a CORS preflight with an empty body.
pub fn create_router(state: AppState, config: &HttpConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/raspberry-data", post(receive_report))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the ingestion API server, serving until `shutdown` resolves.
pub async fn start_api_server(
    state: AppState,
    config: &HttpConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting ingestion API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "aedes-ingest"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    // Check document store connectivity
    match state.documents.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Receives one multipart report from a field device.
///
/// The body is decoded with the crate's own multipart decoder rather than
/// an extractor; the decoder is the contract the device firmware was built
/// against (see [`crate::multipart`]).
#[instrument(skip(state, headers, body))]
async fn receive_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReportAck>, IngestError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let form = MultipartForm::parse(content_type, &body)?;
    let report = SensorReport::from_form(form)?;
    let ack = state.ingestor.ingest(report).await?;
    Ok(Json(ack))
}

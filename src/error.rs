//! Request error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::multipart::MultipartError;

/// An error raised while handling an ingestion request.
///
/// Statistics recomputation failures never surface through this type; the
/// pipeline logs and swallows them.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request body was not a decodable multipart/form-data payload.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A required field was missing or a numeric field failed to parse.
    #[error("validation error: {0}")]
    Validation(String),

    /// The blob store or the document store rejected an operation.
    #[error("upstream error: {0}")]
    Upstream(#[source] anyhow::Error),
}

impl From<MultipartError> for IngestError {
    fn from(err: MultipartError) -> Self {
        IngestError::MalformedRequest(err.to_string())
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::MalformedRequest(_) | IngestError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            IngestError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };

        metrics::counter!("ingest.reports.failed").increment(1);
        error!(status = %status, error = %self, "Request failed");

        let body = Json(json!({
            "status": "error",
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

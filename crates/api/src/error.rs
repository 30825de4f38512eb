//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::ParseError;
use order_flow::FlowError;
use storage::StorageError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// The order flow failed.
    Flow(FlowError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Flow(err) => flow_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn flow_error_to_response(err: FlowError) -> (StatusCode, String) {
    let status = match &err {
        FlowError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        FlowError::Messaging(_) => StatusCode::BAD_GATEWAY,
        FlowError::CompensationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::CONFLICT,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "event handling failed");
    }
    (status, err.to_string())
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        ApiError::Flow(err)
    }
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog file: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

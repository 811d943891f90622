// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while proxying a request to the local API
#[derive(Error, Debug)]
pub enum ApiError {
    /// The local API could not be reached
    #[error("Local API unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The local API did not answer in time
    #[error("Local API timed out: {0}")]
    UpstreamTimeout(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::UpstreamUnavailable(msg) => {
                (StatusCode::BAD_GATEWAY, "upstream_unavailable", msg)
            }
            ApiError::UpstreamTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", msg)
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Failure of one background credential refresh, after retries
#[derive(Error, Debug)]
pub enum RefreshError {
    /// Shutdown was signalled while retrying
    #[error("Credential refresh cancelled after {attempts} attempt(s): {source:#}")]
    Cancelled {
        attempts: u32,
        source: anyhow::Error,
    },

    /// The configured attempt limit was reached
    #[error("Credential refresh gave up after {attempts} attempt(s): {source:#}")]
    Exhausted {
        attempts: u32,
        source: anyhow::Error,
    },
}

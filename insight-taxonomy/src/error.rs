//! Error types for insight-taxonomy
//!
//! `PipelineError` covers hard failures of a phase. Per-item failures never
//! surface here; phases fold them into their report's `errors` list.
//! `ApiError` maps both into HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::conversation_source::SourceError;
use crate::services::oracle::OracleError;

/// Fatal phase error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing config or rows the phase depends on
    #[error("Not found: {0}")]
    NotFound(String),

    /// The phase cannot proceed from the persisted state
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Conversation source error: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Database(#[from] insight_common::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Database(insight_common::Error::Database(err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. pipeline already running for the config
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Common error: {0}")]
    Common(#[from] insight_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Pipeline(err) => {
                let (status, code) = match &err {
                    PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    PipelineError::Precondition(_) => {
                        (StatusCode::CONFLICT, "PRECONDITION_FAILED")
                    }
                    PipelineError::Oracle(_) => (StatusCode::BAD_GATEWAY, "ORACLE_ERROR"),
                    PipelineError::Source(_) => (StatusCode::BAD_GATEWAY, "SOURCE_ERROR"),
                    PipelineError::Database(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
                    }
                    PipelineError::Cancelled => (StatusCode::CONFLICT, "CANCELLED"),
                };
                (status, code, err.to_string())
            }
            ApiError::Common(err) => match err {
                insight_common::Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                insight_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
                }
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    other.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let cases = vec![
            (PipelineError::NotFound("config".into()), StatusCode::NOT_FOUND),
            (PipelineError::Precondition("no categories".into()), StatusCode::CONFLICT),
            (PipelineError::Cancelled, StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn common_not_found_is_404() {
        let response =
            ApiError::from(insight_common::Error::NotFound("config x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

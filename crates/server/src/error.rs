// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use macroview_db::DbError;
use serde::Serialize;
use thiserror::Error;

use crate::jobs::{JobCommand, JobId};

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    /// Covers both "does not exist" and "owned by someone else", so the
    /// response never leaks whether another owner's job id is real.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("An active job already exists for this owner")]
    ActiveJobExists,

    #[error("Monthly quota exceeded for {command}: {used}/{limit}")]
    QuotaExceeded {
        command: JobCommand,
        used: i64,
        limit: i64,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (StatusCode::NOT_FOUND, ErrorResponse::new("Job not found"))
            }
            ApiError::ActiveJobExists => {
                tracing::warn!("Submission rejected: owner already has an active job");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details(
                        "You already have a job running or queued",
                        "Wait for it to finish or cancel it before starting a new one",
                    ),
                )
            }
            ApiError::QuotaExceeded {
                command,
                used,
                limit,
            } => {
                tracing::warn!(command = %command, used, limit, "Plan quota exceeded");
                (
                    StatusCode::PAYMENT_REQUIRED,
                    ErrorResponse::with_details(
                        format!("Free plan: {used}/{limit} {command} jobs used this month"),
                        "Upgrade at /pricing",
                    ),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Unauthorized => {
                tracing::warn!("Request without a resolved user identity");
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorResponse::new("Missing user identity"),
                )
            }
            ApiError::Database(db_err) => {
                tracing::error!(error = %db_err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Database error", db_err.to_string()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

//! Application error type shared by services and HTTP handlers.
//!
//! Services return `AppError`; handlers turn it into a JSON `ErrorResponse`
//! with a matching status code. Database details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Unknown site, run or map.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input: thresholds, grid options, inactive site, unknown model.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Open-Meteo or postcodes.io failed or returned an unusable body.
    #[error("External service error: {0}")]
    ExternalServiceError(String),

    /// An upstream API answered 5xx.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An upstream API answered 429.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalError(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::RateLimited(msg)
            | AppError::InternalError(msg) => msg,
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                "Internal database error".to_string()
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

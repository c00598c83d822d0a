use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use thiserror::Error;

use crate::models::common::ErrorResponse;

/// Failures talking to the external calendar provider.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The stored access token was rejected; the operator must reconnect.
    #[error("access token expired or revoked")]
    AuthExpired,

    /// Provider throttling. Retried with backoff before being surfaced.
    #[error("rate limited by the calendar provider")]
    RateLimited { retry_after: Option<u64> },

    #[error("calendar API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("calendar request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Request-boundary error. Row-level validation problems are captured in
/// the validation result instead; only systemic failures end up here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// Invalid state transition, e.g. a second run of the same import job.
    #[error("{0}")]
    Conflict(String),

    /// Import content changed since validation; the client must validate again.
    #[error("import content changed since validation, validate again")]
    StaleJob,

    #[error("Google authorization expired, reconnect the integration")]
    AuthExpired,

    #[error("calendar provider is rate limiting, retry later")]
    RateLimited,

    #[error("database error: {0}")]
    Db(#[from] DbErr),

    #[error("{0}")]
    Calendar(CalendarError),

    #[error("{0}")]
    Internal(String),
}

impl From<CalendarError> for AppError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::AuthExpired => AppError::AuthExpired,
            CalendarError::RateLimited { .. } => AppError::RateLimited,
            other => AppError::Calendar(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::StaleJob => StatusCode::CONFLICT,
            AppError::AuthExpired => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Db(_) | AppError::Calendar(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

//! Error taxonomy shared by every component, with an axum `IntoResponse` mapping
//! for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The kinds from the error handling design: each variant is surfaced as a
/// specific HTTP status, never leaking internals beyond a single detail string.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadInput(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("transcription cancelled by user")]
    ClientCancelled,

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("service disabled")]
    ServiceDisabled,

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("{0}")]
    EngineFailure(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::BadInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::AuthFailed => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RangeNotSatisfiable => {
                (StatusCode::RANGE_NOT_SATISFIABLE, self.to_string())
            }
            AppError::ClientCancelled => {
                (StatusCode::from_u16(499).unwrap(), self.to_string())
            }
            AppError::UpstreamUnavailable => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::ServiceDisabled => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::EngineFailure(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "unhandled internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorBody { detail })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Typed cancellation raised mid-decode, at a segment boundary.
#[derive(Debug, thiserror::Error)]
#[error("transcription cancelled by user")]
pub struct TranscriptionCancelledError;

impl From<TranscriptionCancelledError> for AppError {
    fn from(_: TranscriptionCancelledError) -> Self {
        AppError::ClientCancelled
    }
}

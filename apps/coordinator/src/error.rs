use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use imn_store::StoreError;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced across the REST boundary, mapped from spec.md §7's
/// abstract error kinds onto 4xx/5xx HTTP semantics.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("busy: too many outstanding requests for this agent")]
    Busy,
    #[error("version conflict")]
    VersionConflict,
    #[error("invalid transition")]
    InvalidTransition,
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::VersionConflict { .. } => ApiError::VersionConflict,
            StoreError::InvalidTransition(_) => ApiError::InvalidTransition,
            other => ApiError::Store(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ApiError::VersionConflict => StatusCode::CONFLICT,
            ApiError::InvalidTransition => StatusCode::CONFLICT,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

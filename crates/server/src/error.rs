//! The HTTP error surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable code.
    pub error: String,
    /// Human-readable detail, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Everything a handler or coordinator service can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailed { expected: String, actual: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] hangar_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] hangar_metadata::MetadataError),

    #[error("archive error: {0}")]
    Archive(#[from] hangar_archive::ArchiveError),

    #[error("core error: {0}")]
    Core(#[from] hangar_core::Error),
}

impl ApiError {
    /// Stable code string for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::IntegrityFailed { .. } => "integrity_failed",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Archive(_) => "archive_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// HTTP status this error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::IntegrityFailed { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Blob I/O problems are infrastructure failures; the client is
            // expected to retry the chunk, which is idempotent.
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                hangar_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                hangar_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                hangar_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Archive(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Core errors reaching the surface are input validation failures
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code().to_string(),
            details: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Shorthand result for handlers and coordinator services.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

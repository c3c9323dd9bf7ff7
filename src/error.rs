use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::backoff::RateLimited;
use crate::gemini::GeminiError;

/// Failure of the batch concept request. Never retried.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("concept request failed: {0}")]
    Backend(#[from] GeminiError),
    #[error("No text response from Gemini")]
    EmptyResponse,
    #[error("concept response did not match the expected shape: {0}")]
    Malformed(String),
    #[error("expected {expected} concepts, got {actual}")]
    WrongCount { expected: usize, actual: usize },
}

/// Failure of one concept's image request.
#[derive(Debug, Error)]
pub enum ImageGenerationError {
    #[error("image request failed: {0}")]
    Backend(#[from] GeminiError),
    #[error("No content parts in image response")]
    NoContent,
    #[error("No image data found in response")]
    NoImageData,
}

impl RateLimited for ImageGenerationError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, ImageGenerationError::Backend(e) if e.is_rate_limited())
    }
}

/// Failure building or finalizing the archive as a whole.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("archive task did not finish: {0}")]
    Interrupted(String),
}

/// Application-level error type for HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Generation(_) => (StatusCode::BAD_GATEWAY, "GENERATION_FAILED"),
            AppError::Export(err) => {
                tracing::error!(error = %err, "Archive export failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_FAILED")
            }
            AppError::Task(err) => {
                tracing::error!(error = %err, "Background task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Top-level error surface for the document-intelligence core.
///
/// Narrower components (chunker, vector index, lexical index, store) define
/// their own `thiserror` enums and get converted into this one at the
/// component boundary, so a handler never has to know which subsystem failed.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("extraction produced no text")]
    ExtractionEmpty,

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("generation provider unavailable: {0}")]
    LLMUnavailable(String),

    #[error("search is unavailable: both vector and lexical branches failed")]
    SearchUnavailable,

    #[error("vector index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::DocumentNotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::ExtractionFailed(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::ExtractionEmpty => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::EmbeddingUnavailable(_) | AppError::LLMUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::SearchUnavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::IndexCorrupt(_) | AppError::DimensionMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Serde(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        (
            status,
            Json(json!({"error": message, "status": status.as_u16()})),
        )
            .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type for RAG operations
pub type RagResult<T> = Result<T, RagError>;

/// Errors surfaced by the retrieval engine and its providers
#[derive(Debug, Error)]
pub enum RagError {
    /// chunk_size must be > 0 and overlap < chunk_size
    #[error("Invalid chunking parameters: chunk_size={chunk_size}, overlap={overlap}")]
    InvalidChunkingParameters { chunk_size: usize, overlap: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Model output lacked the structure the parser requires.
    /// `raw` keeps the original text for diagnostics.
    #[error("Unparsable output: {reason}")]
    UnparsableOutput { reason: String, raw: String },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Provider HTTP error ({status}): {body}")]
    ProviderHttpError { status: u16, body: String },

    #[error("Provider returned an invalid response: {message}")]
    ProviderInvalidResponse { message: String },

    /// The consumer of a streamed completion went away
    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        RagError::ProviderInvalidResponse {
            message: message.into(),
        }
    }

    pub fn unparsable(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        RagError::UnparsableOutput {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Whether the error came from an upstream provider rather than the caller's input
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            RagError::ProviderUnavailable(_)
                | RagError::InvalidModel(_)
                | RagError::ProviderHttpError { .. }
                | RagError::ProviderInvalidResponse { .. }
        )
    }

    /// Stable machine-readable identifier, used in HTTP bodies and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::InvalidChunkingParameters { .. } => "invalid_chunking_parameters",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::CollectionNotFound(_) => "collection_not_found",
            RagError::InvalidQuery(_) => "invalid_query",
            RagError::UnparsableOutput { .. } => "unparsable_output",
            RagError::ProviderUnavailable(_) => "provider_unavailable",
            RagError::InvalidModel(_) => "invalid_model",
            RagError::ProviderHttpError { .. } => "provider_http_error",
            RagError::ProviderInvalidResponse { .. } => "provider_invalid_response",
            RagError::StreamCancelled => "stream_cancelled",
            RagError::Config(_) => "config",
            RagError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RagError::InvalidChunkingParameters { .. }
            | RagError::DimensionMismatch { .. }
            | RagError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            RagError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            RagError::UnparsableOutput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::InvalidModel(_)
            | RagError::ProviderHttpError { .. }
            | RagError::ProviderInvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            RagError::StreamCancelled => StatusCode::REQUEST_TIMEOUT,
            RagError::Config(_) | RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::ProviderUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::invalid_response(format!("JSON error: {}", err))
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            RagError::Internal(_) => "Internal error".to_string(),
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

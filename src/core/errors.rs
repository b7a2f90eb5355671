use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Errors raised inside the retrieval pipeline.
///
/// The taxonomy separates caller-input faults (never retried), provider
/// failures (retryable or terminal) and data-integrity violations such as
/// unnormalized vectors or out-of-range similarity scores.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("embedding provider error: {message}")]
    Embedding { message: String, retryable: bool },
    #[error("vector index error: {message}")]
    Index { message: String, retryable: bool },
    #[error("verification failed, ids never became fetchable: {missing_ids:?}")]
    Verification { missing_ids: Vec<String> },
    #[error("query must not be empty")]
    InvalidQuery,
    #[error("cannot build a prompt without context chunks")]
    MissingContext,
    #[error("cannot build a prompt without a query")]
    MissingQuery,
    #[error("import failed for {document}: {reason}")]
    Import { document: String, reason: String },
    #[error("re-embedding run failed for {failed} of {total} records")]
    SchedulerRun { failed: usize, total: usize },
    #[error("store error: {0}")]
    Store(String),
    #[error("data integrity error: {0}")]
    Data(String),
}

impl PipelineError {
    pub fn embedding<E: std::fmt::Display>(err: E, retryable: bool) -> Self {
        PipelineError::Embedding {
            message: err.to_string(),
            retryable,
        }
    }

    pub fn index<E: std::fmt::Display>(err: E, retryable: bool) -> Self {
        PipelineError::Index {
            message: err.to_string(),
            retryable,
        }
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        PipelineError::Store(err.to_string())
    }

    /// Whether the shared backoff utility may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Embedding {
                retryable: true,
                ..
            } | PipelineError::Index {
                retryable: true,
                ..
            }
        )
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidQuery
            | PipelineError::MissingContext
            | PipelineError::MissingQuery => ApiError::BadRequest(err.to_string()),
            PipelineError::Embedding {
                retryable: true, ..
            }
            | PipelineError::Index {
                retryable: true, ..
            } => ApiError::ServiceUnavailable,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

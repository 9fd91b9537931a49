use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ledger::LedgerError;
use crate::moderation::ModerationError;
use crate::orchestrator::OrchestratorError;
use crate::queue::QueueError;

/// The uniform error envelope returned for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Top-level API error. Every component error enum converts into this at the
/// HTTP edge; nothing below `server::handlers` constructs one directly.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("image queue error: {0}")]
    ImageQueueError(String),
    #[error("video queue error: {0}")]
    VideoQueueError(String),
    #[error("job cancel error: {0}")]
    JobCancelError(String),
    #[error("not the owner of this job")]
    NotOwner,
    #[error("job is not cancellable in its current state")]
    NotCancellable,
    #[error("job not found")]
    NotFound,
    #[error("internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::ImageQueueError(_) => "IMAGE_QUEUE_ERROR",
            ApiError::VideoQueueError(_) => "VIDEO_QUEUE_ERROR",
            ApiError::JobCancelError(_) => "JOB_CANCEL_ERROR",
            ApiError::NotOwner => "NOT_OWNER",
            ApiError::NotCancellable => "NOT_CANCELLABLE",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ImageQueueError(_) | ApiError::VideoQueueError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::JobCancelError(_) => StatusCode::BAD_REQUEST,
            ApiError::NotOwner => StatusCode::FORBIDDEN,
            ApiError::NotCancellable => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::RateLimited { retry_after_ms } => {
                Some(serde_json::json!({ "retryAfter": retry_after_ms }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error surfaced to client");
        }

        let envelope = ErrorEnvelope {
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
            timestamp: chrono::Utc::now(),
        };
        (self.status(), Json(envelope)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits => ApiError::InsufficientCredits,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<ModerationError> for ApiError {
    fn from(e: ModerationError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<crate::job_store::JobStoreError> for ApiError {
    fn from(e: crate::job_store::JobStoreError) -> Self {
        match e {
            crate::job_store::JobStoreError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.into()),
        }
    }
}

//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::DatabaseError;
use crate::pipeline::captioning::PipelineError;
use crate::pipeline::conversation::ChatError;
use crate::pipeline::inference::ProviderError;
use crate::pipeline::report::ReportError;
use crate::storage::StorageError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    /// Date extraction was requested and failed; the client must supply the
    /// imaging date itself.
    #[error("Could not extract date from image")]
    ManualDateRequired,
    #[error("Response blocked by safety settings")]
    SafetyBlocked,
    #[error("Provider failure: {0}")]
    Provider(String),
    #[error("Unusable report response: {0}")]
    UnparseableReport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::ManualDateRequired => (
                StatusCode::BAD_REQUEST,
                "MANUAL_DATE_REQUIRED",
                "Could not extract date from image. Please enter the date manually.".to_string(),
            ),
            ApiError::SafetyBlocked => (
                StatusCode::BAD_REQUEST,
                "SAFETY_BLOCKED",
                "Response blocked due to safety settings. Please rephrase your query.".to_string(),
            ),
            ApiError::Provider(detail) => (
                StatusCode::BAD_GATEWAY,
                "PROVIDER_FAILED",
                format!("AI provider request failed: {detail}"),
            ),
            ApiError::UnparseableReport(detail) => (
                StatusCode::BAD_GATEWAY,
                "REPORT_UNPARSEABLE",
                format!("The AI provider returned an unusable report: {detail}"),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, .. } => {
                ApiError::NotFound(format!("{entity_type} not found"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::SafetyBlocked => ApiError::SafetyBlocked,
            other => ApiError::Provider(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Imaging(e) => ApiError::BadRequest(format!("Invalid image: {e}")),
            PipelineError::NoImages => ApiError::BadRequest("Study has no images".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Provider(provider) => provider.into(),
            ReportError::UnparseableReport(detail) => ApiError::UnparseableReport(detail),
            ReportError::Encode(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Provider(provider) => provider.into(),
        }
    }
}

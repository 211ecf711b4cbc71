//! API Error Types
//!
//! Defines error types for the API layer and implements conversion
//! to HTTP responses with appropriate status codes.
//!
//! Every error body has the same shape:
//!
//! ```json
//! {"success": false, "error": "validation_error", "message": "...", "request_id": "..."}
//! ```

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::ingest::IngestError;
use crate::query::QueryError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Device credentials or admin token rejected
    #[error("{0}")]
    Authentication(String),

    /// Request validation failed
    #[error("{0}")]
    Validation(String),

    /// Resource not found
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness conflict
    #[error("{0}")]
    Conflict(String),

    /// Internal server error
    #[error("{0}")]
    Internal(String),

    /// Service unavailable (dependency down)
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Authentication(_) => "authentication_error",
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_kind = self.kind(),
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_kind = self.kind(),
                error_message = %self,
                "Request rejected"
            );
        }

        // Internal details stay in the log
        let message = match &self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            success: false,
            error: self.kind().to_string(),
            message,
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DeviceNotFound(id) => ApiError::NotFound(format!("Device not found: {}", id)),
            StorageError::CredentialRejected(_) => {
                ApiError::Authentication("Invalid device credentials".to_string())
            }
            StorageError::Conflict(column) => ApiError::Conflict(format!("Duplicate {}", column)),
            StorageError::Pool(_) | StorageError::Task(_) => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Authentication => ApiError::Authentication(err.to_string()),
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::Conflict(msg) => ApiError::Conflict(msg),
            RegistryError::Validation(msg) => ApiError::Validation(msg),
            RegistryError::Storage(e) => e.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Authentication => ApiError::Authentication(err.to_string()),
            IngestError::Validation(msg) => ApiError::Validation(msg),
            IngestError::Storage(e) => e.into(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            QueryError::InvalidTimeRange(_) | QueryError::InvalidParameter(_) => {
                ApiError::Validation(err.to_string())
            }
            QueryError::Storage(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

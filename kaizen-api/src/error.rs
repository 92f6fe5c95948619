//! Error types for the Kaizen HTTP API
//!
//! Every failure is serialized as JSON with an appropriate status code:
//! 400 for validation and store failures, 404 for missing namespaces, 422
//! for typed-metadata validation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kaizen_core::KaizenError;
use serde_json::json;

/// Structured error response for the API layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }
}

impl From<KaizenError> for ApiError {
    fn from(error: KaizenError) -> Self {
        match &error {
            KaizenError::NamespaceNotFound(_) => Self::not_found(error.to_string()),
            KaizenError::NamespaceAlreadyExists(_) | KaizenError::Store(_) => {
                Self::bad_request(error.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.message}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

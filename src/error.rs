//! Error types for the store and the service boundary.

use crate::recurrence::RecurrenceError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// Caller does not own the resource (also used for missing tasks, see `Database::get_task_for`).
    #[error("forbidden")]
    Forbidden,

    #[error("task has no history to undo")]
    NoHistory,

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,
    BadFrequency,
    NoHistory,

    // Authorization
    Unauthorized,
    Forbidden,

    // Not found
    NotFound,

    // Request aborted (shutdown or client gone)
    Cancelled,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// Structured error returned by every service operation.
#[derive(Debug, Serialize)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorCode::Forbidden, "forbidden")
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "authentication required")
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", what))
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "request cancelled")
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFieldValue
            | ErrorCode::BadFrequency
            | ErrorCode::NoHistory => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.code, ErrorCode::DatabaseError | ErrorCode::InternalError)
    }

    /// Body safe to hand to clients: internal details are replaced by a generic message.
    pub fn public_body(&self) -> serde_json::Value {
        if self.is_internal() {
            serde_json::json!({
                "code": ErrorCode::InternalError,
                "message": "internal server error"
            })
        } else {
            serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "message": self.message }))
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::not_found("resource"),
            StoreError::Forbidden => ServiceError::forbidden(),
            StoreError::NoHistory => ServiceError::new(ErrorCode::NoHistory, err.to_string()),
            StoreError::Invalid(reason) => ServiceError::new(ErrorCode::InvalidFieldValue, reason),
            StoreError::Database(e) => ServiceError::new(ErrorCode::DatabaseError, e.to_string()),
            StoreError::Serialization(e) => ServiceError::internal(e),
        }
    }
}

impl From<RecurrenceError> for ServiceError {
    fn from(err: RecurrenceError) -> Self {
        ServiceError::new(ErrorCode::BadFrequency, err.to_string()).with_field("frequency")
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_internal() {
            tracing::error!(code = ?self.code, error = %self.message, "request failed");
        }
        (status, Json(self.public_body())).into_response()
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

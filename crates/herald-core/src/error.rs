//! Unified error types for all layers of the service.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Herald.
///
/// Lower layers (the scheduler core, the configuration loader) keep their
/// own error enums and convert into this one at the service boundary.
#[derive(Error, Debug)]
pub enum HeraldError {
    // ============ Domain Errors ============
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested schedule is not acceptable
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Conflict error (e.g., the resource is in a state that forbids the operation)
    #[error("Conflict: {0}")]
    Conflict(String),

    // ============ Infrastructure Errors ============
    /// Backing store unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// External service error
    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HeraldError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) | Self::InvalidSchedule(_) => 400,
            Self::Conflict(_) => 409,
            Self::StoreUnavailable(_) | Self::Timeout(_) => 503,
            Self::ExternalService { .. } => 502,
            Self::Configuration(_) | Self::Internal(_) | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidSchedule(_) => "INVALID_SCHEDULE",
            Self::Conflict(_) => "CONFLICT",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict<T: Into<String>>(message: T) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if the caller may retry the operation later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ExternalService { .. } | Self::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Serializable error response for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// Field-level validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// Error message
    pub message: String,
    /// Error code
    pub code: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `HeraldError`.
    #[must_use]
    pub fn from_error(error: &HeraldError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            details: None,
        }
    }

    /// Sets field-level validation errors.
    #[must_use]
    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&HeraldError> for ErrorResponse {
    fn from(error: &HeraldError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(HeraldError::not_found("Job", 1).status_code(), 404);
        assert_eq!(HeraldError::validation("empty message").status_code(), 400);
        assert_eq!(HeraldError::InvalidSchedule("past".into()).status_code(), 400);
        assert_eq!(HeraldError::conflict("active").status_code(), 409);
        assert_eq!(HeraldError::StoreUnavailable("down".into()).status_code(), 503);
        assert_eq!(HeraldError::internal("oops").status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(HeraldError::not_found("Job", 1).error_code(), "NOT_FOUND");
        assert_eq!(
            HeraldError::InvalidSchedule("past".into()).error_code(),
            "INVALID_SCHEDULE"
        );
        assert_eq!(
            HeraldError::StoreUnavailable("down".into()).error_code(),
            "STORE_UNAVAILABLE"
        );
        assert_eq!(HeraldError::internal("err").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(HeraldError::StoreUnavailable("connection refused".into()).is_retriable());
        assert!(HeraldError::Timeout("slow".into()).is_retriable());
        assert!(!HeraldError::not_found("Job", 1).is_retriable());
        assert!(!HeraldError::conflict("active").is_retriable());
    }

    #[test]
    fn test_error_response_from_error() {
        let err = HeraldError::not_found("Job", "abc");
        let response = ErrorResponse::from_error(&err);
        assert_eq!(response.code, "NOT_FOUND");
        assert!(response.message.contains("abc"));
        assert!(response.details.is_none());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: HeraldError = anyhow::anyhow!("boom").into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "boom");
    }
}

//! Error types for the domain layer.

use std::error::Error;
use std::fmt;
use thiserror::Error;

/// Errors raised while validating identifiers or inbound client payloads.
///
/// Always recoverable: the originating connection receives a scoped
/// `error` event and stays connected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' is required")]
    MissingField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Handler failed to process '{event}'")]
    HandlerFault { event: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    /// Creates a missing field validation error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        ValidationError::MissingField { field: field.into() }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an error for a handler that faulted while processing an event.
    pub fn handler_fault(event: impl Into<String>) -> Self {
        ValidationError::HandlerFault { event: event.into() }
    }
}

/// Error codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Connection-fatal
    Unauthorized,

    // Recoverable, requester only
    RoomAccessDenied,
    ValidationFailed,
    UnknownEvent,

    // Infrastructure
    BackplaneUnavailable,
    InternalError,
}

impl ErrorCode {
    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::Unauthorized)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::RoomAccessDenied => "ROOM_ACCESS_DENIED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::UnknownEvent => "UNKNOWN_EVENT",
            ErrorCode::BackplaneUnavailable => "BACKPLANE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Client-visible error with a code and a stable message.
///
/// The message is what the client sees in the `error` event; it must not
/// reveal anything about other tenants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
}

impl DomainError {
    /// Creates a new domain error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ValidationError> for DomainError {
    fn from(err: ValidationError) -> Self {
        let code = match err {
            ValidationError::UnknownEventType(_) => ErrorCode::UnknownEvent,
            ValidationError::HandlerFault { .. } => ErrorCode::InternalError,
            _ => ErrorCode::ValidationFailed,
        };
        Self::new(code, err.to_string())
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for DomainError {}

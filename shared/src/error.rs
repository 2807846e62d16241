//! Domain errors raised by the inventory rules
//!
//! These are business-rule failures. They are returned as values so the
//! caller can decide how to present them; infrastructure failures never end up
//! here.

use thiserror::Error;
use uuid::Uuid;

/// Business-rule failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Insufficient stock for {code}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: Uuid,
        code: String,
        requested: i32,
        available: i32,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("An inventory count is in progress; stock is frozen")]
    ActiveSessionConflict,

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },
}

impl CoreError {
    pub fn not_found(what: &str) -> Self {
        CoreError::NotFound(what.to_string())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        CoreError::InvalidState(message.into())
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result alias for domain rules
pub type CoreResult<T> = Result<T, CoreError>;

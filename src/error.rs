//! Error types for Parlor Core.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Parlor operations
pub type ParlorResult<T> = Result<T, ParlorError>;

/// Main error type for Parlor operations
#[derive(Error, Debug)]
pub enum ParlorError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Prompt deck is empty")]
    EmptyDeck,

    #[error("{0}")]
    Other(String),
}

impl ParlorError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ParlorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new sync error
    pub fn sync(message: impl Into<String>) -> Self {
        ParlorError::Sync(message.into())
    }

    /// Create a new store error
    pub fn store(message: impl Into<String>) -> Self {
        ParlorError::Store(message.into())
    }

    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        ParlorError::Network(message.into())
    }
}

//! Model parsing and validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised at the message parse boundary.
///
/// None of these are retryable: a body that fails to parse will fail the
/// same way on every redelivery.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown status label: {0}")]
    UnknownStatus(String),

    #[error("Invalid progress value: {0}")]
    InvalidProgress(f64),

    #[error("Invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("Event carries no upload records")]
    EmptyEvent,
}

impl ModelError {
    pub fn invalid_object_key(msg: impl Into<String>) -> Self {
        Self::InvalidObjectKey(msg.into())
    }
}

//! Worker error types.
//!
//! Each port has its own error with a retryable/fatal split. `WorkerError`
//! wraps them for the coordinator, processor and executor.

use thiserror::Error;

use vtrack_firestore::FirestoreError;
use vtrack_models::ModelError;
use vtrack_queue::QueueError;
use vtrack_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Entity store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Entity store unavailable: {0}")]
    Unavailable(String),

    #[error("Entity store rejected the request: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Rejected(_))
    }
}

impl From<FirestoreError> for StoreError {
    fn from(e: FirestoreError) -> Self {
        match e {
            FirestoreError::Aborted(_) | FirestoreError::PreconditionFailed(_) => {
                StoreError::Conflict(e.to_string())
            }
            _ if e.is_retryable() => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Rejected(e.to_string()),
        }
    }
}

/// Metadata lookup failure.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Uploaded object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object metadata unavailable: {0}")]
    Unavailable(String),

    #[error("Object store misconfigured: {0}")]
    Misconfigured(String),
}

impl ResolutionError {
    /// Every resolution failure is redelivered. An object that is not
    /// visible yet, or credentials being rotated, can clear up before the
    /// entry runs out of retries.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

impl From<StorageError> for ResolutionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => ResolutionError::ObjectNotFound(key),
            StorageError::ConfigError(msg) => ResolutionError::Misconfigured(msg),
            StorageError::AwsSdk(msg) => ResolutionError::Unavailable(msg),
        }
    }
}

/// Outbound publish failure.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Payload could not be encoded: {0}")]
    Encoding(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Unavailable(_))
    }
}

impl From<QueueError> for PublishError {
    fn from(e: QueueError) -> Self {
        if e.is_retryable() {
            PublishError::Unavailable(e.to_string())
        } else {
            PublishError::Encoding(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Parse error: {0}")]
    Parse(#[from] ModelError),

    #[error("Metadata resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Entity store error: {0}")]
    Store(#[from] StoreError),

    #[error("Work item publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Notification delivery failed: {0}")]
    Notification(PublishError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Parse(_) | WorkerError::ConfigError(_) => false,
            WorkerError::Resolution(e) => e.is_retryable(),
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Publish(e) | WorkerError::Notification(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firestore_errors_map_to_store_errors() {
        assert!(matches!(
            StoreError::from(FirestoreError::Aborted("x".into())),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            StoreError::from(FirestoreError::ServerError(503, "x".into())),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(FirestoreError::PermissionDenied("x".into())),
            StoreError::Rejected(_)
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(!WorkerError::from(ModelError::EmptyEvent).is_retryable());
        assert!(WorkerError::from(ResolutionError::ObjectNotFound("b/k".into())).is_retryable());
        assert!(WorkerError::from(ResolutionError::Misconfigured("no region".into())).is_retryable());
        assert!(WorkerError::from(ResolutionError::Unavailable("timeout".into())).is_retryable());
        assert!(WorkerError::from(StoreError::Conflict("aborted".into())).is_retryable());
        assert!(WorkerError::Notification(PublishError::Unavailable("down".into())).is_retryable());
        assert!(!WorkerError::from(PublishError::Encoding("bad".into())).is_retryable());
    }
}

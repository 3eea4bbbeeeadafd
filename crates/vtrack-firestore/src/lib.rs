//! Firestore REST API client.
//!
//! This crate provides:
//! - A transactional client (`beginTransaction` / `commit` / `rollback`)
//! - The tracked video repository used by ingestion and progress handling
//! - Service account authentication via gcp_auth
//! - Retry with backoff, tracing spans and request metrics

pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod types;
pub mod video_repo;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
pub use video_repo::{MergeResult, SeedResult, TrackedVideoRepository, DEFAULT_COLLECTION};

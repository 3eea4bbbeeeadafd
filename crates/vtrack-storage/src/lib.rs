//! S3-compatible object store client.
//!
//! Only object metadata is read here: the ingestion stage needs the user
//! metadata, last-modified time and etag written at upload time, never the
//! object body.

pub mod client;
pub mod error;

pub use client::{ObjectHead, S3Client, S3Config};
pub use error::{StorageError, StorageResult};

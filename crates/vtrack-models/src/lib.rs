//! Shared data models for the vtrack pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Tracked video entities and their lifecycle status
//! - Upload events received from object storage
//! - Progress messages and the partial-merge rules applied to entities
//! - Outbound work items and terminal notifications

pub mod error;
pub mod notification;
pub mod progress;
pub mod upload_event;
pub mod video;
pub mod work_item;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use notification::Notification;
pub use progress::ProgressUpdate;
pub use upload_event::{parse_upload_events, UploadEvent};
pub use video::{MergeEffect, StorageLocation, TrackedVideo, VideoId, VideoStatus};
pub use work_item::WorkItem;

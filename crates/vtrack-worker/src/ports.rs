//! Interfaces the pipeline core talks to.
//!
//! The coordinator, processor and emitter only see these traits; the
//! implementations over Firestore, S3 and Redis live in [`crate::adapters`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vtrack_models::{Notification, ProgressUpdate, StorageLocation, TrackedVideo, VideoId, WorkItem};

use crate::error::{PublishError, ResolutionError, StoreError};

pub use vtrack_firestore::{MergeResult, SeedResult};
pub use vtrack_storage::ObjectHead;

/// Persistent collection of tracked videos.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Transactionally write a seed record. Existing QUEUED records are
    /// replaced; records past QUEUED are returned untouched.
    async fn seed(&self, video: &TrackedVideo) -> Result<SeedResult, StoreError>;

    /// Undo a seed if the record still carries `version`. Returns whether
    /// anything was reverted.
    async fn revert_seed(
        &self,
        video_id: &VideoId,
        previous: Option<&TrackedVideo>,
        version: &str,
    ) -> Result<bool, StoreError>;

    /// Atomic read-modify-write of a progress update.
    async fn merge_progress(
        &self,
        update: &ProgressUpdate,
        at: DateTime<Utc>,
    ) -> Result<MergeResult, StoreError>;

    /// Mark the terminal notification of a video as delivered.
    async fn clear_notification_pending(&self, video_id: &VideoId) -> Result<(), StoreError>;
}

/// Object store metadata lookup.
#[async_trait]
pub trait ObjectMetadataSource: Send + Sync {
    async fn head(&self, location: &StorageLocation) -> Result<ObjectHead, ResolutionError>;
}

/// Downstream processing queue.
#[async_trait]
pub trait WorkItemPublisher: Send + Sync {
    async fn publish_work_item(&self, item: &WorkItem) -> Result<(), PublishError>;
}

/// Outbound notification channel.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish_notification(&self, notification: &Notification) -> Result<(), PublishError>;
}

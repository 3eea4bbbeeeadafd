//! Port implementations over Firestore, S3 and Redis Streams.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use vtrack_firestore::{FirestoreError, TrackedVideoRepository};
use vtrack_models::{Notification, ProgressUpdate, StorageLocation, TrackedVideo, VideoId, WorkItem};
use vtrack_queue::{PublishOutcome, StreamQueue};
use vtrack_storage::{S3Client, StorageError};

use crate::error::{PublishError, ResolutionError, StoreError};
use crate::ports::{
    EntityStore, MergeResult, NotificationPublisher, ObjectHead, ObjectMetadataSource, SeedResult,
    WorkItemPublisher,
};
use crate::resources::LazyResource;

/// [`EntityStore`] backed by the Firestore tracked-video repository.
pub struct FirestoreEntityStore {
    repo: Arc<LazyResource<TrackedVideoRepository, FirestoreError>>,
}

impl FirestoreEntityStore {
    pub fn new(repo: Arc<LazyResource<TrackedVideoRepository, FirestoreError>>) -> Self {
        Self { repo }
    }

    async fn repo(&self) -> Result<&TrackedVideoRepository, StoreError> {
        Ok(self.repo.get().await?)
    }
}

#[async_trait]
impl EntityStore for FirestoreEntityStore {
    async fn seed(&self, video: &TrackedVideo) -> Result<SeedResult, StoreError> {
        Ok(self.repo().await?.seed(video).await?)
    }

    async fn revert_seed(
        &self,
        video_id: &VideoId,
        previous: Option<&TrackedVideo>,
        version: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .repo()
            .await?
            .revert_seed(video_id, previous, version)
            .await?)
    }

    async fn merge_progress(
        &self,
        update: &ProgressUpdate,
        at: DateTime<Utc>,
    ) -> Result<MergeResult, StoreError> {
        Ok(self.repo().await?.merge_progress(update, at).await?)
    }

    async fn clear_notification_pending(&self, video_id: &VideoId) -> Result<(), StoreError> {
        Ok(self.repo().await?.clear_notification_pending(video_id).await?)
    }
}

/// [`ObjectMetadataSource`] over S3 `HeadObject`.
pub struct S3MetadataSource {
    client: Arc<LazyResource<S3Client, StorageError>>,
}

impl S3MetadataSource {
    pub fn new(client: Arc<LazyResource<S3Client, StorageError>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectMetadataSource for S3MetadataSource {
    async fn head(&self, location: &StorageLocation) -> Result<ObjectHead, ResolutionError> {
        let client = self.client.get().await?;
        Ok(client
            .head_object(&location.container, &location.object_key)
            .await?)
    }
}

/// Publishes work items and notifications to their Redis streams.
pub struct RedisPublisher {
    queue: Arc<StreamQueue>,
    work_stream: String,
    notification_stream: String,
}

impl RedisPublisher {
    pub fn new(
        queue: Arc<StreamQueue>,
        work_stream: impl Into<String>,
        notification_stream: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            work_stream: work_stream.into(),
            notification_stream: notification_stream.into(),
        }
    }

    async fn publish<T: serde::Serialize + Sync>(
        &self,
        stream: &str,
        payload: &T,
        key: &str,
    ) -> Result<(), PublishError> {
        match self.queue.publish_json(stream, payload, Some(key)).await? {
            PublishOutcome::Published(entry_id) => {
                debug!(stream = %stream, key = %key, entry_id = %entry_id, "Published");
            }
            PublishOutcome::Duplicate => {
                debug!(stream = %stream, key = %key, "Already published within dedup window");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkItemPublisher for RedisPublisher {
    async fn publish_work_item(&self, item: &WorkItem) -> Result<(), PublishError> {
        self.publish(&self.work_stream, item, &item.idempotency_key())
            .await
    }
}

#[async_trait]
impl NotificationPublisher for RedisPublisher {
    async fn publish_notification(&self, notification: &Notification) -> Result<(), PublishError> {
        self.publish(
            &self.notification_stream,
            notification,
            &notification.idempotency_key(),
        )
        .await
    }
}

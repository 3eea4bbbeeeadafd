//! In-memory port implementations for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use vtrack_models::{
    Notification, ProgressUpdate, StorageLocation, TrackedVideo, VideoId, VideoStatus, WorkItem,
};
use vtrack_storage::ObjectHead;
use vtrack_worker::error::{PublishError, ResolutionError, StoreError};
use vtrack_worker::ports::{MergeResult, SeedResult};
use vtrack_worker::{
    EntityStore, IngestionCoordinator, MetadataResolver, NotificationEmitter,
    NotificationPublisher, ObjectMetadataSource, ProgressUpdateProcessor, WorkItemPublisher,
};

/// Entity store keeping one versioned record per video, with the same
/// seed, revert and merge rules as the Firestore repository.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<VideoId, (TrackedVideo, u64)>>,
    next_version: Mutex<u64>,
    pub unavailable: AtomicBool,
}

impl InMemoryStore {
    fn bump(&self) -> u64 {
        let mut next = self.next_version.lock().unwrap();
        *next += 1;
        *next
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    pub fn insert(&self, video: TrackedVideo) {
        let version = self.bump();
        self.records
            .lock()
            .unwrap()
            .insert(video.video_id.clone(), (video, version));
    }

    pub fn get(&self, id: &str) -> Option<TrackedVideo> {
        self.records
            .lock()
            .unwrap()
            .get(&VideoId::from(id))
            .map(|(video, _)| video.clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn seed(&self, video: &TrackedVideo) -> Result<SeedResult, StoreError> {
        self.check_available()?;
        let version = self.bump();
        let mut records = self.records.lock().unwrap();

        let previous = records.get(&video.video_id).map(|(v, _)| v.clone());
        match previous {
            Some(existing) if existing.status != VideoStatus::Queued => {
                Ok(SeedResult::AlreadyProgressed(Box::new(existing)))
            }
            Some(existing) => {
                let replacement = video.reseed_over(&existing);
                records.insert(video.video_id.clone(), (replacement, version));
                Ok(SeedResult::Replaced {
                    previous: Box::new(existing),
                    version: version.to_string(),
                })
            }
            None => {
                records.insert(video.video_id.clone(), (video.clone(), version));
                Ok(SeedResult::Created {
                    version: version.to_string(),
                })
            }
        }
    }

    async fn revert_seed(
        &self,
        video_id: &VideoId,
        previous: Option<&TrackedVideo>,
        version: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let restored_version = self.bump();
        let mut records = self.records.lock().unwrap();

        let current = records.get(video_id).map(|(_, v)| v.to_string());
        if current.as_deref() != Some(version) {
            return Ok(false);
        }

        match previous {
            Some(prev) => {
                records.insert(video_id.clone(), (prev.clone(), restored_version));
            }
            None => {
                records.remove(video_id);
            }
        }
        Ok(true)
    }

    async fn merge_progress(
        &self,
        update: &ProgressUpdate,
        at: DateTime<Utc>,
    ) -> Result<MergeResult, StoreError> {
        self.check_available()?;
        let version = self.bump();
        let mut records = self.records.lock().unwrap();

        let Some((video, stored_version)) = records.get_mut(&update.video_id) else {
            return Ok(MergeResult::NotFound);
        };

        let effect = video.merge(update, at);
        if effect.is_updated() {
            *stored_version = version;
        }
        Ok(MergeResult::Merged {
            video: Box::new(video.clone()),
            effect,
        })
    }

    async fn clear_notification_pending(&self, video_id: &VideoId) -> Result<(), StoreError> {
        self.check_available()?;
        let version = self.bump();
        let mut records = self.records.lock().unwrap();

        match records.get_mut(video_id) {
            Some((video, stored_version)) => {
                video.notification_pending = false;
                *stored_version = version;
                Ok(())
            }
            None => Err(StoreError::Rejected(format!("no document {}", video_id))),
        }
    }
}

/// Object store with per-location heads.
#[derive(Default)]
pub struct InMemoryObjects {
    heads: Mutex<HashMap<StorageLocation, ObjectHead>>,
    pub unavailable: AtomicBool,
}

impl InMemoryObjects {
    pub fn put(&self, container: &str, key: &str, metadata: &[(&str, &str)], etag: &str) {
        let metadata = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let head = ObjectHead::new(metadata, Some(uploaded_at()), Some(etag.to_string()));
        self.heads
            .lock()
            .unwrap()
            .insert(StorageLocation::new(container, key), head);
    }
}

#[async_trait]
impl ObjectMetadataSource for InMemoryObjects {
    async fn head(&self, location: &StorageLocation) -> Result<ObjectHead, ResolutionError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ResolutionError::Unavailable("connection reset".into()));
        }
        self.heads
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| ResolutionError::ObjectNotFound(location.to_string()))
    }
}

/// Publisher that records what went out and suppresses repeated
/// idempotency keys like the Redis dedup guard does.
#[derive(Default)]
pub struct RecordingPublisher {
    pub work_items: Mutex<Vec<WorkItem>>,
    pub notifications: Mutex<Vec<Notification>>,
    seen_keys: Mutex<HashSet<String>>,
    pub fail_work_items: AtomicBool,
    pub fail_notifications: AtomicBool,
}

impl RecordingPublisher {
    fn first_time(&self, key: String) -> bool {
        self.seen_keys.lock().unwrap().insert(key)
    }

    pub fn work_items(&self) -> Vec<WorkItem> {
        self.work_items.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkItemPublisher for RecordingPublisher {
    async fn publish_work_item(&self, item: &WorkItem) -> Result<(), PublishError> {
        if self.fail_work_items.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("work stream down".into()));
        }
        if self.first_time(item.idempotency_key()) {
            self.work_items.lock().unwrap().push(item.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish_notification(&self, notification: &Notification) -> Result<(), PublishError> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("notification stream down".into()));
        }
        if self.first_time(notification.idempotency_key()) {
            self.notifications.lock().unwrap().push(notification.clone());
        }
        Ok(())
    }
}

/// Coordinator and processor wired to in-memory ports.
pub struct Pipeline {
    pub store: Arc<InMemoryStore>,
    pub objects: Arc<InMemoryObjects>,
    pub publisher: Arc<RecordingPublisher>,
    pub coordinator: IngestionCoordinator,
    pub processor: ProgressUpdateProcessor,
}

impl Pipeline {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::default());
        let objects = Arc::new(InMemoryObjects::default());
        let publisher = Arc::new(RecordingPublisher::default());

        let coordinator = IngestionCoordinator::new(
            MetadataResolver::new(objects.clone()),
            store.clone(),
            publisher.clone(),
        );
        let processor = ProgressUpdateProcessor::new(
            store.clone(),
            NotificationEmitter::new(publisher.clone()),
        );

        Self {
            store,
            objects,
            publisher,
            coordinator,
            processor,
        }
    }
}

pub fn uploaded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap()
}

/// A video the processing system has already picked up.
pub fn video(id: &str, status: VideoStatus, owner: Option<&str>) -> TrackedVideo {
    let mut video = TrackedVideo::seed(
        VideoId::from(id),
        StorageLocation::new("videos", format!("{}.mp4", id)),
        None,
        owner.map(str::to_string),
        uploaded_at(),
    );
    video.status = status;
    video
}

/// An S3 event notification body for one object.
pub fn s3_event(container: &str, key: &str) -> String {
    serde_json::json!({
        "Records": [{
            "eventName": "ObjectCreated:Put",
            "s3": {"bucket": {"name": container}, "object": {"key": key}}
        }]
    })
    .to_string()
}

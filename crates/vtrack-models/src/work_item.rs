//! Work item handed to the downstream processing system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::video::{TrackedVideo, VideoId};

/// Message published to the work stream for every ingested video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub video_id: VideoId,
    pub video_hash: Option<String>,
    pub owner_id: Option<String>,
    pub container: String,
    pub key: String,
    /// Upload time of the source object
    pub timestamp: DateTime<Utc>,
}

impl WorkItem {
    /// Build the work item for a freshly seeded entity.
    pub fn for_video(video: &TrackedVideo, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            video_id: video.video_id.clone(),
            video_hash: video.video_hash.clone(),
            owner_id: video.owner_id.clone(),
            container: video.source_location.container.clone(),
            key: video.source_location.object_key.clone(),
            timestamp: uploaded_at,
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("ingest:{}", self.video_id)
    }
}

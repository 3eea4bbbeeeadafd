//! Terminal-status notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::video::{StorageLocation, TrackedVideo, VideoId, VideoStatus};

/// Payload published when a tracked video reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub video_id: VideoId,
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<StorageLocation>,
    pub status: VideoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Build the notification from the post-merge entity.
    pub fn for_video(video: &TrackedVideo, emitted_at: DateTime<Utc>) -> Self {
        Self {
            video_id: video.video_id.clone(),
            owner_id: video.owner_id.clone(),
            result_location: video.result_location.clone(),
            status: video.status,
            message: video.message.clone(),
            timestamp: emitted_at,
        }
    }

    /// One key per terminal transition, so a re-sent notification for the
    /// same transition collapses inside the dedup window.
    pub fn idempotency_key(&self) -> String {
        format!("notify:{}:{}", self.video_id, self.status)
    }
}

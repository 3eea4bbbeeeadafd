//! Terminal-status notifications.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use vtrack_models::{Notification, TrackedVideo};

use crate::error::{WorkerError, WorkerResult};
use crate::ports::NotificationPublisher;

/// Formats and publishes the notification for a finished video.
#[derive(Clone)]
pub struct NotificationEmitter {
    publisher: Arc<dyn NotificationPublisher>,
}

impl NotificationEmitter {
    pub fn new(publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish the notification for `video`, stamped with the emission time.
    pub async fn notify(&self, video: &TrackedVideo) -> WorkerResult<Notification> {
        let notification = Notification::for_video(video, Utc::now());

        self.publisher
            .publish_notification(&notification)
            .await
            .map_err(WorkerError::Notification)?;

        info!(
            video_id = %notification.video_id,
            status = %notification.status,
            "Published terminal notification"
        );
        Ok(notification)
    }
}

//! Tracked video entity and lifecycle status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ModelError;
use crate::progress::ProgressUpdate;

/// Unique identifier for a tracked video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive a stable ID for an upload that arrived without one.
    ///
    /// The same location and version marker always yield the same ID, so a
    /// redelivered upload event resolves to the entity seeded by the first
    /// delivery.
    pub fn derive(location: &StorageLocation, version: &str) -> Self {
        let name = format!(
            "vtrack://{}/{}#{}",
            location.container, location.object_key, version
        );
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Location of an object in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct StorageLocation {
    /// Bucket / container name
    #[serde(alias = "bucket")]
    pub container: String,
    /// Object key inside the container
    #[serde(alias = "key")]
    pub object_key: String,
}

impl StorageLocation {
    pub fn new(container: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            object_key: object_key.into(),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object_key)
    }
}

/// Video processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    /// Seeded by ingestion, waiting for the processing system
    #[default]
    #[serde(alias = "queued")]
    Queued,
    /// Picked up by the processing system
    #[serde(alias = "processing")]
    Processing,
    /// Processing failed
    #[serde(alias = "failed")]
    Failed,
    /// Processing completed, result available
    #[serde(alias = "completed")]
    Completed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Queued => "QUEUED",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Failed => "FAILED",
            VideoStatus::Completed => "COMPLETED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            VideoStatus::Queued => 0,
            VideoStatus::Processing => 1,
            VideoStatus::Failed | VideoStatus::Completed => 2,
        }
    }

    /// Whether a message may move an entity from `self` to `next`.
    ///
    /// Status only moves forward. Terminal states accept nothing, and a
    /// late PROCESSING never pulls a video back from a later state. Skipping
    /// straight from QUEUED to a terminal state is allowed since the
    /// PROCESSING message may have been reordered or lost.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(VideoStatus::Queued),
            "PROCESSING" => Ok(VideoStatus::Processing),
            "FAILED" => Ok(VideoStatus::Failed),
            "COMPLETED" => Ok(VideoStatus::Completed),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// Tracked video entity stored in the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrackedVideo {
    /// Unique video ID
    pub video_id: VideoId,

    /// Content fingerprint supplied by the uploader
    #[serde(default)]
    pub video_hash: Option<String>,

    /// Requesting user
    #[serde(default)]
    pub owner_id: Option<String>,

    /// Original upload
    pub source_location: StorageLocation,

    /// Processing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Completion indicator reported by the processing system
    #[serde(default)]
    pub progress: f64,

    /// Produced artifact, once available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<StorageLocation>,

    /// Human-readable status detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set together with the terminal transition, cleared once the
    /// notification for it has been published
    #[serde(default)]
    pub notification_pending: bool,

    /// Seeding timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub last_update: DateTime<Utc>,
}

/// Outcome of merging a progress update into an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeEffect {
    /// Entity was already terminal; nothing applied.
    Terminal,
    /// Every present field already held the incoming value.
    Unchanged,
    /// At least one field changed.
    Updated {
        /// The merge moved the entity from a non-terminal into a terminal status.
        entered_terminal: bool,
    },
}

impl MergeEffect {
    pub fn is_updated(&self) -> bool {
        matches!(self, MergeEffect::Updated { .. })
    }

    pub fn entered_terminal(&self) -> bool {
        matches!(self, MergeEffect::Updated { entered_terminal: true })
    }
}

impl TrackedVideo {
    /// Build the seed record written at ingestion.
    pub fn seed(
        video_id: VideoId,
        source_location: StorageLocation,
        video_hash: Option<String>,
        owner_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            video_id,
            video_hash,
            owner_id,
            source_location,
            status: VideoStatus::Queued,
            progress: 0.0,
            result_location: None,
            message: None,
            notification_pending: false,
            created_at: at,
            last_update: at,
        }
    }

    /// Apply this seed to a record that is still QUEUED.
    ///
    /// Only the upload fields come from the seed. Progress state, creation
    /// time and `last_update` stay as the record has them.
    pub fn reseed_over(&self, previous: &TrackedVideo) -> TrackedVideo {
        TrackedVideo {
            video_hash: self.video_hash.clone(),
            owner_id: self.owner_id.clone(),
            source_location: self.source_location.clone(),
            ..previous.clone()
        }
    }

    /// Check if the entity is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply the fields present in `update`, leaving absent ones untouched.
    ///
    /// `last_update` moves only when something changed, which keeps a
    /// redelivered message from producing a different document.
    pub fn merge(&mut self, update: &ProgressUpdate, at: DateTime<Utc>) -> MergeEffect {
        if self.is_terminal() {
            return MergeEffect::Terminal;
        }

        let mut changed = false;
        let mut entered_terminal = false;

        if let Some(progress) = update.progress {
            if progress != self.progress {
                self.progress = progress;
                changed = true;
            }
        }

        if let Some(status) = update.status {
            if self.status.can_transition_to(status) {
                self.status = status;
                changed = true;
                entered_terminal = status.is_terminal();
            }
        }

        if let Some(location) = &update.result_location {
            if self.result_location.as_ref() != Some(location) {
                self.result_location = Some(location.clone());
                changed = true;
            }
        }

        if let Some(message) = &update.message {
            if self.message.as_ref() != Some(message) {
                self.message = Some(message.clone());
                changed = true;
            }
        }

        if !changed {
            return MergeEffect::Unchanged;
        }

        if entered_terminal {
            self.notification_pending = true;
        }
        self.last_update = at;

        MergeEffect::Updated { entered_terminal }
    }
}

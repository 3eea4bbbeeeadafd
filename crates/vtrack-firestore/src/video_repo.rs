//! Tracked video repository.
//!
//! Every mutation runs as a Firestore read-write transaction so that
//! concurrent workers handling the same video serialize on the document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use vtrack_models::{
    MergeEffect, ProgressUpdate, StorageLocation, TrackedVideo, VideoId, VideoStatus,
};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_seed_revert;
use crate::types::{Document, FromFirestoreValue, Precondition, ToFirestoreValue, Value, Write};

/// Default collection for tracked videos.
pub const DEFAULT_COLLECTION: &str = "tracked_videos";

/// Outcome of seeding a video record.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedResult {
    /// No record existed; `version` is the new document's update time.
    Created { version: String },
    /// A QUEUED record was overwritten.
    Replaced {
        previous: Box<TrackedVideo>,
        version: String,
    },
    /// The record already moved past QUEUED; nothing was written.
    AlreadyProgressed(Box<TrackedVideo>),
}

/// Outcome of merging a progress update.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeResult {
    /// No record for this video.
    NotFound,
    /// The record after the merge, with what the merge did.
    Merged {
        video: Box<TrackedVideo>,
        effect: MergeEffect,
    },
}

/// Repository for tracked video documents.
#[derive(Clone)]
pub struct TrackedVideoRepository {
    client: FirestoreClient,
    collection: String,
}

impl TrackedVideoRepository {
    /// Create a new repository over `collection`.
    pub fn new(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn document_name(&self, video_id: &VideoId) -> String {
        self.client
            .full_document_name(&self.collection, video_id.as_str())
    }

    /// Get a video by ID.
    pub async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<TrackedVideo>> {
        let doc = self
            .client
            .get_document(&self.collection, video_id.as_str())
            .await?;

        doc.map(|d| document_to_tracked_video(&d, video_id))
            .transpose()
    }

    /// Write the seed record for a freshly uploaded video.
    ///
    /// An existing QUEUED record gets the upload fields of `video` while
    /// keeping whatever progress was already merged into it; a record in
    /// any later status is left alone.
    pub async fn seed(&self, video: &TrackedVideo) -> FirestoreResult<SeedResult> {
        self.client
            .with_retry("seed", || self.seed_once(video))
            .await
    }

    async fn seed_once(&self, video: &TrackedVideo) -> FirestoreResult<SeedResult> {
        let video_id = &video.video_id;
        let tx = self.client.begin_transaction().await?;

        let existing = match self.read_in_transaction(video_id, &tx).await {
            Ok(existing) => existing,
            Err(e) => {
                self.client.rollback_quietly(tx).await;
                return Err(e);
            }
        };

        let record = match &existing {
            Some(previous) if previous.status != VideoStatus::Queued => {
                self.client.rollback_quietly(tx).await;
                debug!(video_id = %video_id, status = %previous.status, "Seed skipped, video already progressed");
                return Ok(SeedResult::AlreadyProgressed(Box::new(previous.clone())));
            }
            Some(previous) => video.reseed_over(previous),
            None => video.clone(),
        };

        let doc = Document::named(self.document_name(video_id), tracked_video_to_fields(&record));
        let response = self.client.commit(vec![Write::upsert(doc)], Some(tx)).await?;
        let version = response
            .first_update_time()
            .ok_or_else(|| FirestoreError::invalid_response("commit returned no update time"))?;

        info!(video_id = %video_id, collection = %self.collection, "Seeded tracked video");

        Ok(match existing {
            None => SeedResult::Created { version },
            Some(previous) => SeedResult::Replaced {
                previous: Box::new(previous),
                version,
            },
        })
    }

    /// Undo a seed whose follow-up publish failed.
    ///
    /// Deletes the record (or restores `previous`) only if it still carries
    /// the `version` written by the seed. Returns `false` when a newer write
    /// got there first, in which case the record is left as is.
    pub async fn revert_seed(
        &self,
        video_id: &VideoId,
        previous: Option<&TrackedVideo>,
        version: &str,
    ) -> FirestoreResult<bool> {
        let name = self.document_name(video_id);
        let write = match previous {
            None => Write::delete(name),
            Some(prev) => Write::upsert(Document::named(name, tracked_video_to_fields(prev))),
        }
        .with_precondition(Precondition::updated_at(version));

        let result = self
            .client
            .with_retry("revert_seed", || self.client.commit(vec![write.clone()], None))
            .await;

        match result {
            Ok(_) => {
                record_seed_revert("reverted");
                info!(video_id = %video_id, restored = previous.is_some(), "Reverted seed");
                Ok(true)
            }
            Err(e) if e.is_precondition_failed() => {
                record_seed_revert("superseded");
                warn!(video_id = %video_id, "Seed revert skipped, record changed since seeding");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Merge a progress update as one read-modify-write.
    pub async fn merge_progress(
        &self,
        update: &ProgressUpdate,
        at: DateTime<Utc>,
    ) -> FirestoreResult<MergeResult> {
        self.client
            .with_retry("merge_progress", || self.merge_once(update, at))
            .await
    }

    async fn merge_once(
        &self,
        update: &ProgressUpdate,
        at: DateTime<Utc>,
    ) -> FirestoreResult<MergeResult> {
        let video_id = &update.video_id;
        let tx = self.client.begin_transaction().await?;

        let mut video = match self.read_in_transaction(video_id, &tx).await {
            Ok(Some(video)) => video,
            Ok(None) => {
                self.client.rollback_quietly(tx).await;
                return Ok(MergeResult::NotFound);
            }
            Err(e) => {
                self.client.rollback_quietly(tx).await;
                return Err(e);
            }
        };

        let effect = video.merge(update, at);
        if !effect.is_updated() {
            self.client.rollback_quietly(tx).await;
            return Ok(MergeResult::Merged {
                video: Box::new(video),
                effect,
            });
        }

        let mask = merge_mask(update);
        let doc = Document::named(self.document_name(video_id), masked_fields(&video, &mask));

        self.client
            .commit(
                vec![Write::patch(doc, mask).with_precondition(Precondition::exists(true))],
                Some(tx),
            )
            .await?;

        Ok(MergeResult::Merged {
            video: Box::new(video),
            effect,
        })
    }

    /// Clear the pending-notification marker. Leaves `last_update` alone.
    pub async fn clear_notification_pending(&self, video_id: &VideoId) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("notification_pending".to_string(), false.to_firestore_value());
        let doc = Document::named(self.document_name(video_id), fields);
        let write = Write::patch(doc, vec!["notification_pending".to_string()])
            .with_precondition(Precondition::exists(true));

        self.client
            .with_retry("clear_notification_pending", || {
                self.client.commit(vec![write.clone()], None)
            })
            .await?;
        Ok(())
    }

    async fn read_in_transaction(
        &self,
        video_id: &VideoId,
        tx: &str,
    ) -> FirestoreResult<Option<TrackedVideo>> {
        let doc = self
            .client
            .get_document_in_transaction(&self.collection, video_id.as_str(), tx)
            .await?;
        doc.map(|d| document_to_tracked_video(&d, video_id))
            .transpose()
    }
}

// =============================================================================
// Field conversion
// =============================================================================

fn location_to_value(location: &StorageLocation) -> Value {
    let mut fields = HashMap::new();
    fields.insert("container".to_string(), location.container.to_firestore_value());
    fields.insert("object_key".to_string(), location.object_key.to_firestore_value());
    fields.to_firestore_value()
}

fn location_from_value(value: &Value) -> Option<StorageLocation> {
    let fields = HashMap::<String, Value>::from_firestore_value(value)?;
    let container = fields.get("container").and_then(String::from_firestore_value)?;
    let object_key = fields.get("object_key").and_then(String::from_firestore_value)?;
    Some(StorageLocation::new(container, object_key))
}

/// Fields a merge of `update` may write.
pub(crate) fn merge_mask(update: &ProgressUpdate) -> Vec<String> {
    let mut mask: Vec<String> = update.field_names().into_iter().map(String::from).collect();
    mask.push("last_update".to_string());
    mask.push("notification_pending".to_string());
    mask
}

pub(crate) fn masked_fields(video: &TrackedVideo, mask: &[String]) -> HashMap<String, Value> {
    tracked_video_to_fields(video)
        .into_iter()
        .filter(|(key, _)| mask.contains(key))
        .collect()
}

pub(crate) fn tracked_video_to_fields(video: &TrackedVideo) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("video_id".to_string(), video.video_id.as_str().to_firestore_value());
    fields.insert("video_hash".to_string(), video.video_hash.to_firestore_value());
    fields.insert("owner_id".to_string(), video.owner_id.to_firestore_value());
    fields.insert("source_location".to_string(), location_to_value(&video.source_location));
    fields.insert("status".to_string(), video.status.as_str().to_firestore_value());
    fields.insert("progress".to_string(), video.progress.to_firestore_value());
    fields.insert(
        "result_location".to_string(),
        video
            .result_location
            .as_ref()
            .map(location_to_value)
            .unwrap_or(Value::NullValue(())),
    );
    fields.insert("message".to_string(), video.message.to_firestore_value());
    fields.insert(
        "notification_pending".to_string(),
        video.notification_pending.to_firestore_value(),
    );
    fields.insert("created_at".to_string(), video.created_at.to_firestore_value());
    fields.insert("last_update".to_string(), video.last_update.to_firestore_value());
    fields
}

pub(crate) fn document_to_tracked_video(
    doc: &Document,
    video_id: &VideoId,
) -> FirestoreResult<TrackedVideo> {
    let fields = doc.fields.as_ref().ok_or_else(|| {
        FirestoreError::InvalidResponse(format!("Document {} has no fields", video_id))
    })?;

    let get_string = |key: &str| -> Option<String> {
        fields.get(key).and_then(String::from_firestore_value)
    };
    let get_time = |key: &str| -> Option<DateTime<Utc>> {
        fields.get(key).and_then(DateTime::<Utc>::from_firestore_value)
    };

    let source_location = fields
        .get("source_location")
        .and_then(location_from_value)
        .ok_or_else(|| {
            FirestoreError::invalid_response(format!("{}: missing source_location", video_id))
        })?;

    let status = match get_string("status") {
        Some(s) => s
            .parse::<VideoStatus>()
            .map_err(|e| FirestoreError::invalid_response(format!("{}: {}", video_id, e)))?,
        None => VideoStatus::Queued,
    };

    let created_at = get_time("created_at").unwrap_or_else(Utc::now);

    Ok(TrackedVideo {
        video_id: video_id.clone(),
        video_hash: get_string("video_hash"),
        owner_id: get_string("owner_id"),
        source_location,
        status,
        progress: fields
            .get("progress")
            .and_then(f64::from_firestore_value)
            .unwrap_or(0.0),
        result_location: fields.get("result_location").and_then(location_from_value),
        message: get_string("message"),
        notification_pending: fields
            .get("notification_pending")
            .and_then(bool::from_firestore_value)
            .unwrap_or(false),
        created_at,
        last_update: get_time("last_update").unwrap_or(created_at),
    })
}

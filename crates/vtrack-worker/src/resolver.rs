//! Upload-time metadata resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use vtrack_models::{StorageLocation, VideoId};

use crate::error::ResolutionError;
use crate::ports::{ObjectHead, ObjectMetadataSource};

const ID_KEYS: &[&str] = &["video_id", "video-id"];
const HASH_KEYS: &[&str] = &["video_hash", "video-hash", "content_hash"];
const OWNER_KEYS: &[&str] = &["owner_id", "cognito_user_id", "user_id"];

/// Metadata recorded on the object by the uploader.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub video_id: Option<VideoId>,
    pub video_hash: Option<String>,
    pub owner_id: Option<String>,
    /// Last-modified time of the object, or the resolution time if the
    /// store did not report one
    pub timestamp: DateTime<Utc>,
    pub etag: Option<String>,
}

impl ResolvedMetadata {
    pub fn from_head(head: &ObjectHead, resolved_at: DateTime<Utc>) -> Self {
        let value = |keys: &[&str]| head.first_value(keys).map(str::to_string);

        Self {
            video_id: value(ID_KEYS).map(VideoId::from),
            video_hash: value(HASH_KEYS),
            owner_id: value(OWNER_KEYS),
            timestamp: head.last_modified.unwrap_or(resolved_at),
            etag: head.etag.clone(),
        }
    }

    /// The entity ID for this upload: the uploader's ID when present, else
    /// one derived from the location and the object version.
    pub fn identity(&self, location: &StorageLocation) -> VideoId {
        match &self.video_id {
            Some(id) => id.clone(),
            None => {
                let version = self
                    .etag
                    .clone()
                    .unwrap_or_else(|| self.timestamp.to_rfc3339());
                VideoId::derive(location, &version)
            }
        }
    }
}

/// Looks up upload metadata through an [`ObjectMetadataSource`].
#[derive(Clone)]
pub struct MetadataResolver {
    source: Arc<dyn ObjectMetadataSource>,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn ObjectMetadataSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(
        &self,
        location: &StorageLocation,
    ) -> Result<ResolvedMetadata, ResolutionError> {
        let head = self.source.head(location).await?;
        let resolved = ResolvedMetadata::from_head(&head, Utc::now());

        debug!(
            location = %location,
            has_video_id = resolved.video_id.is_some(),
            has_owner = resolved.owner_id.is_some(),
            "Resolved upload metadata"
        );
        Ok(resolved)
    }
}

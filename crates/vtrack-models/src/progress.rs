//! Progress messages emitted by the processing system.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::video::{StorageLocation, VideoId, VideoStatus};

/// Wire shape of a progress message. Every field is optional here so that
/// validation produces a precise error instead of a generic serde one.
#[derive(Debug, Deserialize)]
struct RawProgressMessage {
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result_location: Option<StorageLocation>,
    /// Older producers report the packaged output as `zip: {bucket, key}`.
    #[serde(default)]
    zip: Option<StorageLocation>,
    #[serde(default)]
    message: Option<String>,
}

/// A validated partial update for one tracked video.
///
/// Only fields that are `Some` get merged; see [`crate::TrackedVideo::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub video_id: VideoId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VideoStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<StorageLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    /// Parse and validate a message body.
    pub fn parse(body: &str) -> ModelResult<Self> {
        let raw: RawProgressMessage = serde_json::from_str(body)?;

        let video_id = raw
            .video_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ModelError::MissingField("video_id"))?;

        if let Some(progress) = raw.progress {
            if !progress.is_finite() || progress < 0.0 {
                return Err(ModelError::InvalidProgress(progress));
            }
        }

        let status: Option<VideoStatus> = raw.status.as_deref().map(str::parse).transpose()?;

        Ok(Self {
            video_id: VideoId::from(video_id),
            progress: raw.progress,
            status,
            result_location: raw.result_location.or(raw.zip),
            message: raw.message,
        })
    }

    /// True when the message carries nothing to merge.
    pub fn is_empty(&self) -> bool {
        self.progress.is_none()
            && self.status.is_none()
            && self.result_location.is_none()
            && self.message.is_none()
    }

    /// Names of the fields this update touches, in storage order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.progress.is_some() {
            names.push("progress");
        }
        if self.status.is_some() {
            names.push("status");
        }
        if self.result_location.is_some() {
            names.push("result_location");
        }
        if self.message.is_some() {
            names.push("message");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_message() {
        let update = ProgressUpdate::parse(
            r#"{"video_id":"v1","status":"COMPLETED","progress":100,
                "result_location":{"container":"out","object_key":"v1.zip"},
                "message":"done"}"#,
        )
        .unwrap();

        assert_eq!(update.video_id.as_str(), "v1");
        assert_eq!(update.status, Some(VideoStatus::Completed));
        assert_eq!(update.progress, Some(100.0));
        assert_eq!(update.result_location, Some(StorageLocation::new("out", "v1.zip")));
        assert_eq!(update.message.as_deref(), Some("done"));
    }

    #[test]
    fn test_parse_legacy_zip_field() {
        let update =
            ProgressUpdate::parse(r#"{"video_id":"v1","zip":{"bucket":"b","key":"zips/a.zip"}}"#)
                .unwrap();
        assert_eq!(update.result_location, Some(StorageLocation::new("b", "zips/a.zip")));
    }

    #[test]
    fn test_absent_fields_stay_none() {
        let update = ProgressUpdate::parse(r#"{"video_id":"v1","progress":10}"#).unwrap();
        assert!(update.status.is_none());
        assert!(update.result_location.is_none());
        assert_eq!(update.field_names(), vec!["progress"]);
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        assert!(matches!(ProgressUpdate::parse("not json"), Err(ModelError::Json(_))));
        assert!(matches!(
            ProgressUpdate::parse(r#"{"progress":10}"#),
            Err(ModelError::MissingField("video_id"))
        ));
        assert!(matches!(
            ProgressUpdate::parse(r#"{"video_id":"  "}"#),
            Err(ModelError::MissingField("video_id"))
        ));
        assert!(matches!(
            ProgressUpdate::parse(r#"{"video_id":"v1","status":"DONE"}"#),
            Err(ModelError::UnknownStatus(_))
        ));
        assert!(matches!(
            ProgressUpdate::parse(r#"{"video_id":"v1","progress":-1}"#),
            Err(ModelError::InvalidProgress(_))
        ));
    }

    #[test]
    fn test_empty_update() {
        let update = ProgressUpdate::parse(r#"{"video_id":"v1"}"#).unwrap();
        assert!(update.is_empty());
    }
}

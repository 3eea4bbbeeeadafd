//! Object-storage upload notifications.
//!
//! The delivery system forwards S3 event notifications either whole
//! (`{"Records": [...]}`) or one record at a time. Both shapes decode into a
//! list of [`UploadEvent`]s.

use serde::Deserialize;

use crate::error::{ModelError, ModelResult};
use crate::video::StorageLocation;

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    event_name: Option<String>,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// One uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    /// Container and decoded object key
    pub location: StorageLocation,
    /// S3 event name, e.g. `ObjectCreated:Put`
    pub event_name: Option<String>,
}

impl UploadEvent {
    fn from_record(record: S3EventRecord) -> ModelResult<Self> {
        Ok(Self {
            location: StorageLocation::new(
                record.s3.bucket.name,
                decode_object_key(&record.s3.object.key)?,
            ),
            event_name: record.event_name,
        })
    }
}

/// Decode an object key as it appears in S3 notifications: form-encoded,
/// with `+` standing for a space.
pub fn decode_object_key(raw: &str) -> ModelResult<String> {
    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced)
        .map_err(|e| ModelError::invalid_object_key(format!("{}: {}", raw, e)))?;
    if decoded.is_empty() {
        return Err(ModelError::invalid_object_key("empty key"));
    }
    Ok(decoded.into_owned())
}

/// Parse a delivery body into upload events.
///
/// The outer error covers a body that is not an event notification at all.
/// Inside a `Records` list each record is decoded on its own, so one bad
/// record yields an `Err` in its slot and leaves its siblings intact.
pub fn parse_upload_events(body: &str) -> ModelResult<Vec<ModelResult<UploadEvent>>> {
    let value: serde_json::Value = serde_json::from_str(body)?;

    match value.get("Records") {
        Some(records) => {
            let records = records
                .as_array()
                .ok_or(ModelError::MissingField("Records"))?;
            if records.is_empty() {
                return Err(ModelError::EmptyEvent);
            }
            Ok(records.iter().map(decode_record).collect())
        }
        None => Ok(vec![Ok(decode_record(&value)?)]),
    }
}

fn decode_record(value: &serde_json::Value) -> ModelResult<UploadEvent> {
    let record = S3EventRecord::deserialize(value)?;
    UploadEvent::from_record(record)
}

//! S3 client implementation.

use std::collections::HashMap;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible stores (MinIO, R2, LocalStack)
    pub endpoint_url: Option<String>,
    /// Static access key; falls back to the default AWS provider chain when unset
    pub access_key_id: Option<String>,
    /// Static secret key
    pub secret_access_key: Option<String>,
    /// Region
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let access_key_id = non_empty("S3_ACCESS_KEY_ID");
        let secret_access_key = non_empty("S3_SECRET_ACCESS_KEY");
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::config_error(
                "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together",
            ));
        }

        Ok(Self {
            endpoint_url: non_empty("S3_ENDPOINT_URL"),
            access_key_id,
            secret_access_key,
            region: non_empty("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    /// User metadata with lower-cased keys
    pub metadata: HashMap<String, String>,
    /// Last modified timestamp
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag, quotes stripped
    pub etag: Option<String>,
}

impl ObjectHead {
    pub fn new(
        metadata: HashMap<String, String>,
        last_modified: Option<DateTime<Utc>>,
        etag: Option<String>,
    ) -> Self {
        Self {
            metadata: metadata
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            last_modified,
            etag: etag.map(|e| e.trim_matches('"').to_string()).filter(|e| !e.is_empty()),
        }
    }

    /// First non-empty metadata value among `keys`, compared case-insensitively.
    pub fn first_value(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.metadata.get(&key.to_ascii_lowercase()))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// S3 object store client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let mut builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(key, secret, None, None, "vtrack-env")),
            _ => {
                let shared: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                Builder::from(&shared)
            }
        };

        builder = builder.region(Region::new(config.region));
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Self::new(config).await
    }

    /// Fetch an object's metadata without its body.
    pub async fn head_object(&self, container: &str, key: &str) -> StorageResult<ObjectHead> {
        debug!(container = %container, key = %key, "HeadObject");

        let response = self
            .client
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    StorageError::not_found(format!("{}/{}", container, key))
                } else {
                    StorageError::AwsSdk(format!("HeadObject {}/{}: {}", container, key, e))
                }
            })?;

        let last_modified = response
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));

        Ok(ObjectHead::new(
            response.metadata().cloned().unwrap_or_default(),
            last_modified,
            response.e_tag().map(str::to_string),
        ))
    }
}

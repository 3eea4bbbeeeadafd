//! Stream client over Redis Streams consumer groups.

use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// Field holding the JSON payload of every entry.
pub const BODY_FIELD: &str = "body";

/// Retry counters outlive any sane redelivery window.
const RETRY_COUNTER_TTL_SECS: i64 = 86_400;

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Redis URL
    pub redis_url: String,
    /// Consumer group shared by all workers
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream: String,
    /// Failed deliveries before an entry is dead-lettered
    pub max_retries: u32,
    /// Lifetime of the duplicate-publish guard
    pub dedup_ttl: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            consumer_group: "vtrack:workers".to_string(),
            dlq_stream: "vtrack:dlq".to_string(),
            max_retries: 5,
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl StreamConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            consumer_group: std::env::var("VTRACK_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream: std::env::var("VTRACK_DLQ_STREAM").unwrap_or(defaults.dlq_stream),
            max_retries: std::env::var("VTRACK_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            dedup_ttl: std::env::var("VTRACK_DEDUP_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream the entry was read from
    pub stream: String,
    /// Redis entry ID
    pub id: String,
    /// Payload, `None` if the producer omitted the body field
    pub body: Option<String>,
}

impl StreamEntry {
    fn from_stream_id(stream: &str, entry: &StreamId) -> Self {
        Self {
            stream: stream.to_string(),
            id: entry.id.clone(),
            body: entry.get::<String>(BODY_FIELD),
        }
    }
}

/// Result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Appended under this entry ID.
    Published(String),
    /// The idempotency key was seen within the dedup window; nothing appended.
    Duplicate,
}

/// Redis Streams client.
#[derive(Clone)]
pub struct StreamQueue {
    client: redis::Client,
    config: StreamConfig,
}

impl StreamQueue {
    /// Create a new stream client. Connections are opened per operation.
    pub fn new(config: StreamConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(StreamConfig::from_env())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group for `stream` (and the stream itself) if missing.
    pub async fn init_group(&self, stream: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(stream = %stream, group = %self.config.consumer_group, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %stream, group = %self.config.consumer_group, "Consumer group already exists");
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append `body` to `stream`.
    ///
    /// With an idempotency key, the append happens only if the key was not
    /// used within the dedup window. The guard is released again if the
    /// append itself fails so that a retry can go through.
    pub async fn publish(
        &self,
        stream: &str,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> QueueResult<PublishOutcome> {
        let mut conn = self.connection().await?;

        let dedup_key = idempotency_key.map(dedup_key);
        if let Some(key) = &dedup_key {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(self.config.dedup_ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await?;
            if claimed.is_none() {
                debug!(stream = %stream, key = %key, "Duplicate publish suppressed");
                return Ok(PublishOutcome::Duplicate);
            }
        }

        let appended: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await;

        match appended {
            Ok(entry_id) => {
                debug!(stream = %stream, entry_id = %entry_id, "Published entry");
                Ok(PublishOutcome::Published(entry_id))
            }
            Err(e) => {
                if let Some(key) = &dedup_key {
                    if let Err(release) = conn.del::<_, ()>(key).await {
                        warn!(key = %key, error = %release, "Failed to release dedup key");
                    }
                }
                Err(QueueError::publish_failed(format!("XADD {}: {}", stream, e)))
            }
        }
    }

    /// Serialize `payload` as JSON and publish it.
    pub async fn publish_json<T: Serialize>(
        &self,
        stream: &str,
        payload: &T,
        idempotency_key: Option<&str>,
    ) -> QueueResult<PublishOutcome> {
        let body = serde_json::to_string(payload)?;
        self.publish(stream, &body, idempotency_key).await
    }

    /// Read up to `count` new entries for `consumer`, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        stream: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> QueueResult<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .map(|r| {
                r.keys
                    .iter()
                    .flat_map(|key| {
                        key.ids
                            .iter()
                            .map(move |entry| StreamEntry::from_stream_id(&key.key, entry))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Acknowledge an entry and drop it from the stream.
    pub async fn ack(&self, stream: &str, entry_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(entry_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(stream)
            .arg(entry_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(retry_key(stream, entry_id)).await?;

        debug!(stream = %stream, entry_id = %entry_id, "Acknowledged entry");
        Ok(())
    }

    /// Take over entries that have been pending longer than `min_idle`,
    /// typically left behind by a crashed consumer.
    pub async fn claim_pending(
        &self,
        stream: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for p in &pending.ids {
            claim.arg(&p.id);
        }

        let claimed: StreamClaimReply = claim.query_async(&mut conn).await?;

        let entries: Vec<StreamEntry> = claimed
            .ids
            .iter()
            .map(|entry| StreamEntry::from_stream_id(stream, entry))
            .collect();

        if !entries.is_empty() {
            info!(stream = %stream, consumer = %consumer, claimed = entries.len(), "Claimed idle pending entries");
        }
        Ok(entries)
    }

    /// Bump the failure counter of an entry and return the new value.
    pub async fn increment_retry(&self, stream: &str, entry_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;

        let key = retry_key(stream, entry_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_COUNTER_TTL_SECS).await?;
        Ok(count)
    }

    /// Copy an entry to the dead letter stream, then acknowledge it.
    pub async fn dead_letter(&self, entry: &StreamEntry, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(entry.body.as_deref().unwrap_or(""))
            .arg("source_stream")
            .arg(&entry.stream)
            .arg("original_id")
            .arg(&entry.id)
            .arg("error")
            .arg(error)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&entry.stream, &entry.id).await?;

        warn!(stream = %entry.stream, entry_id = %entry.id, error = %error, "Moved entry to DLQ");
        Ok(())
    }

    /// Stream length.
    pub async fn len(&self, stream: &str) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(stream).await?;
        Ok(len)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

fn dedup_key(idempotency_key: &str) -> String {
    format!("vtrack:dedup:{}", idempotency_key)
}

fn retry_key(stream: &str, entry_id: &str) -> String {
    format!("vtrack:retry:{}:{}", stream, entry_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_key_layout() {
        assert_eq!(dedup_key("ingest:v1"), "vtrack:dedup:ingest:v1");
        assert_eq!(retry_key("vtrack:uploads", "1-0"), "vtrack:retry:vtrack:uploads:1-0");
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("VTRACK_MAX_RETRIES", "9");
        std::env::set_var("VTRACK_DEDUP_TTL_SECS", "60");
        std::env::remove_var("VTRACK_CONSUMER_GROUP");

        let config = StreamConfig::from_env();
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.dedup_ttl, Duration::from_secs(60));
        assert_eq!(config.consumer_group, "vtrack:workers");

        std::env::remove_var("VTRACK_MAX_RETRIES");
        std::env::remove_var("VTRACK_DEDUP_TTL_SECS");
    }

    #[test]
    #[serial]
    fn test_config_ignores_garbage_numbers() {
        std::env::set_var("VTRACK_MAX_RETRIES", "many");
        assert_eq!(StreamConfig::from_env().max_retries, 5);
        std::env::remove_var("VTRACK_MAX_RETRIES");
    }

    // Requires a running Redis at REDIS_URL.
    #[tokio::test]
    #[ignore]
    async fn test_publish_is_deduplicated() {
        let queue = StreamQueue::from_env().unwrap();
        let stream = "vtrack:test:dedup";
        let key = format!("test:{}", std::process::id());

        let first = queue.publish(stream, "{}", Some(&key)).await.unwrap();
        let second = queue.publish(stream, "{}", Some(&key)).await.unwrap();

        assert!(matches!(first, PublishOutcome::Published(_)));
        assert_eq!(second, PublishOutcome::Duplicate);
    }

    // Requires a running Redis at REDIS_URL.
    #[tokio::test]
    #[ignore]
    async fn test_consume_and_ack() {
        let queue = StreamQueue::from_env().unwrap();
        let stream = format!("vtrack:test:consume:{}", std::process::id());
        queue.init_group(&stream).await.unwrap();
        queue.publish(&stream, r#"{"k":1}"#, None).await.unwrap();

        let entries = queue.consume(&stream, "test-consumer", 10, 100).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].body.as_deref(), Some(r#"{"k":1}"#));

        queue.ack(&stream, &entries[0].id).await.unwrap();
        assert_eq!(queue.len(&stream).await.unwrap(), 0);
    }
}

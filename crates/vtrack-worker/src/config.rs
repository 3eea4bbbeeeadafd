//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use vtrack_firestore::DEFAULT_COLLECTION;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Inbound upload notifications
    pub upload_stream: String,
    /// Inbound progress messages
    pub progress_stream: String,
    /// Outbound work items
    pub work_stream: String,
    /// Outbound terminal notifications
    pub notification_stream: String,
    /// Firestore collection holding tracked videos
    pub collection: String,
    /// Entries read per batch
    pub batch_size: usize,
    /// How long a read blocks waiting for entries
    pub block_ms: u64,
    /// How often to scan for entries abandoned by crashed consumers
    pub claim_interval: Duration,
    /// Minimum idle time before a pending entry can be claimed
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            upload_stream: "vtrack:uploads".to_string(),
            progress_stream: "vtrack:progress".to_string(),
            work_stream: "vtrack:work".to_string(),
            notification_stream: "vtrack:notifications".to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            batch_size: 10,
            block_ms: 5000,
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let string = |key: &str, default: String| std::env::var(key).unwrap_or(default);
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(addr) if !addr.is_empty() => Some(addr.parse::<SocketAddr>().map_err(|e| {
                WorkerError::config_error(format!("METRICS_ADDR '{}': {}", addr, e))
            })?),
            _ => None,
        };

        Ok(Self {
            upload_stream: string("VTRACK_UPLOAD_STREAM", defaults.upload_stream),
            progress_stream: string("VTRACK_PROGRESS_STREAM", defaults.progress_stream),
            work_stream: string("VTRACK_WORK_STREAM", defaults.work_stream),
            notification_stream: string("VTRACK_NOTIFICATION_STREAM", defaults.notification_stream),
            collection: string("VTRACK_COLLECTION", defaults.collection),
            batch_size: std::env::var("VTRACK_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            block_ms: std::env::var("VTRACK_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.block_ms),
            claim_interval: secs("VTRACK_CLAIM_INTERVAL_SECS", defaults.claim_interval),
            claim_min_idle: secs("VTRACK_CLAIM_MIN_IDLE_SECS", defaults.claim_min_idle),
            shutdown_timeout: secs("VTRACK_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout),
            metrics_addr,
        })
    }
}

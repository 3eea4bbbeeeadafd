//! Ingestion and progress-tracking worker binary.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vtrack_firestore::{FirestoreClient, FirestoreError, TrackedVideoRepository};
use vtrack_queue::StreamQueue;
use vtrack_storage::{S3Client, StorageError};
use vtrack_worker::{
    FirestoreEntityStore, IngestionCoordinator, LazyResource, MetadataResolver,
    NotificationEmitter, ProgressUpdateProcessor, RedisPublisher, S3MetadataSource,
    StreamExecutor, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting vtrack-worker");

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let queue = Arc::new(StreamQueue::from_env().context("failed to create stream client")?);

    // Clients are built on first use so the worker starts even while
    // Firestore or S3 are still unreachable.
    let collection = config.collection.clone();
    let repo = Arc::new(LazyResource::new("firestore", move || {
        let collection = collection.clone();
        async move {
            let client = FirestoreClient::from_env().await?;
            Ok::<_, FirestoreError>(TrackedVideoRepository::new(client, collection))
        }
    }));
    let s3 = Arc::new(LazyResource::new("s3", || async {
        Ok::<_, StorageError>(S3Client::from_env().await?)
    }));

    let store = Arc::new(FirestoreEntityStore::new(repo));
    let publisher = Arc::new(RedisPublisher::new(
        Arc::clone(&queue),
        config.work_stream.clone(),
        config.notification_stream.clone(),
    ));

    let coordinator = IngestionCoordinator::new(
        MetadataResolver::new(Arc::new(S3MetadataSource::new(s3))),
        store.clone(),
        publisher.clone(),
    );
    let processor = ProgressUpdateProcessor::new(store, NotificationEmitter::new(publisher));

    let shutdown_timeout = config.shutdown_timeout;
    let executor = Arc::new(StreamExecutor::new(config, queue, coordinator, processor));

    let mut run = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.run().await }
    });

    tokio::select! {
        result = &mut run => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("Executor error: {}", e);
                    Err(e.into())
                }
                Err(e) => Err(anyhow::anyhow!("executor task failed: {}", e)),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    executor.shutdown();
    match tokio::time::timeout(shutdown_timeout, run).await {
        Ok(Ok(Ok(()))) => info!("Worker shutdown complete"),
        Ok(Ok(Err(e))) => error!("Executor error during shutdown: {}", e),
        Ok(Err(e)) => error!("Executor task failed: {}", e),
        Err(_) => warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Shutdown timed out, abandoning in-flight batches"
        ),
    }

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vtrack=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

//! Stream executor.
//!
//! Drives the upload and progress consumer loops plus the periodic claim of
//! entries abandoned by crashed consumers. Entries are acknowledged one by
//! one once their work has taken effect; failed entries stay pending and are
//! dead-lettered after `max_retries` failed deliveries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vtrack_models::parse_upload_events;
use vtrack_queue::{StreamEntry, StreamQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::ingestion::{IngestReport, IngestionCoordinator};
use crate::metrics;
use crate::progress::{ProgressFailure, ProgressUpdateProcessor};

/// Pause after a failed read before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What to do with a stream entry once its handler ran.
#[derive(Debug)]
pub enum EntryDisposition {
    /// Done, or dropped for good.
    Ack,
    /// Leave pending for redelivery.
    Retry(WorkerError),
    /// Redelivery cannot help.
    DeadLetter(WorkerError),
}

impl EntryDisposition {
    fn from_error(error: WorkerError) -> Self {
        if error.is_retryable() {
            EntryDisposition::Retry(error)
        } else {
            EntryDisposition::DeadLetter(error)
        }
    }
}

/// Disposition of an upload entry from the report of its events.
///
/// One retryable failure is enough to redeliver the entry: the events that
/// already went through come back as redeliveries and are absorbed.
pub fn ingest_disposition(report: IngestReport) -> EntryDisposition {
    let mut fatal = None;
    for failure in report.failures {
        if failure.is_retryable() {
            return EntryDisposition::Retry(failure.error);
        }
        fatal.get_or_insert(failure.error);
    }

    match fatal {
        Some(error) => EntryDisposition::DeadLetter(error),
        None => EntryDisposition::Ack,
    }
}

/// Per-message dispositions of a progress batch of `len` messages.
pub fn progress_dispositions(
    len: usize,
    failures: Vec<(usize, ProgressFailure)>,
) -> Vec<EntryDisposition> {
    let mut dispositions: Vec<EntryDisposition> =
        (0..len).map(|_| EntryDisposition::Ack).collect();

    for (index, failure) in failures {
        if let Some(slot) = dispositions.get_mut(index) {
            *slot = EntryDisposition::from_error(failure.error);
        }
    }
    dispositions
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Uploads,
    Progress,
}

/// Consumes the inbound streams and dispatches entries to the pipeline.
pub struct StreamExecutor {
    config: WorkerConfig,
    queue: Arc<StreamQueue>,
    coordinator: IngestionCoordinator,
    processor: ProgressUpdateProcessor,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl StreamExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<StreamQueue>,
        coordinator: IngestionCoordinator,
        processor: ProgressUpdateProcessor,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            coordinator,
            processor,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Ask every loop to stop after its current batch.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until [`Self::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        self.queue.init_group(&self.config.upload_stream).await?;
        self.queue.init_group(&self.config.progress_stream).await?;

        info!(
            consumer = %self.consumer_name,
            uploads = %self.config.upload_stream,
            progress = %self.config.progress_stream,
            batch_size = self.config.batch_size,
            "Starting stream executor"
        );

        tokio::join!(
            self.consume_loop(StreamKind::Uploads),
            self.consume_loop(StreamKind::Progress),
            self.claim_loop(),
        );

        info!(consumer = %self.consumer_name, "Stream executor stopped");
        Ok(())
    }

    fn stream_name(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Uploads => &self.config.upload_stream,
            StreamKind::Progress => &self.config.progress_stream,
        }
    }

    async fn consume_loop(&self, kind: StreamKind) {
        let stream = self.stream_name(kind);
        let mut shutdown = self.shutdown.subscribe();

        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => {}
                result = self.queue.consume(
                    stream,
                    &self.consumer_name,
                    self.config.batch_size,
                    self.config.block_ms,
                ) => {
                    match result {
                        Ok(entries) if !entries.is_empty() => {
                            debug!(stream = %stream, count = entries.len(), "Consumed entries");
                            self.process_entries(kind, entries).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(stream = %stream, error = %e, "Error consuming entries");
                            tokio::time::sleep(ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
        debug!(stream = %stream, "Consumer loop stopped");
    }

    async fn claim_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.config.claim_interval);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = interval.tick() => {
                    for kind in [StreamKind::Uploads, StreamKind::Progress] {
                        let stream = self.stream_name(kind);
                        match self
                            .queue
                            .claim_pending(
                                stream,
                                &self.consumer_name,
                                self.config.claim_min_idle,
                                self.config.batch_size,
                            )
                            .await
                        {
                            Ok(entries) if !entries.is_empty() => {
                                self.process_entries(kind, entries).await;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(stream = %stream, error = %e, "Failed to claim pending entries");
                            }
                        }
                    }
                }
            }
        }
    }

    async fn process_entries(&self, kind: StreamKind, entries: Vec<StreamEntry>) {
        match kind {
            StreamKind::Uploads => {
                for entry in &entries {
                    let disposition = self.ingest_entry(entry).await;
                    self.settle(entry, disposition).await;
                }
            }
            StreamKind::Progress => self.process_progress(entries).await,
        }
    }

    async fn ingest_entry(&self, entry: &StreamEntry) -> EntryDisposition {
        let Some(body) = entry.body.as_deref() else {
            warn!(message_id = %entry.id, "Upload entry without body, dropping");
            metrics::record_skipped("missing_body");
            return EntryDisposition::Ack;
        };

        let records = match parse_upload_events(body) {
            Ok(records) => records,
            Err(e) => {
                warn!(message_id = %entry.id, error = %e, "Skipping malformed upload event");
                metrics::record_skipped("malformed");
                return EntryDisposition::Ack;
            }
        };

        let report = self.coordinator.handle_records(records).await;
        debug!(
            message_id = %entry.id,
            processed = report.processed,
            failed = report.failures.len(),
            "Handled upload entry"
        );
        ingest_disposition(report)
    }

    async fn process_progress(&self, entries: Vec<StreamEntry>) {
        let mut with_body = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.body.is_some() {
                with_body.push(entry);
            } else {
                warn!(message_id = %entry.id, "Progress entry without body, dropping");
                metrics::record_skipped("missing_body");
                self.settle(&entry, EntryDisposition::Ack).await;
            }
        }

        let bodies: Vec<&str> = with_body
            .iter()
            .filter_map(|entry| entry.body.as_deref())
            .collect();
        let report = self.processor.handle(&bodies).await;

        let dispositions = progress_dispositions(with_body.len(), report.failures);
        for (entry, disposition) in with_body.iter().zip(dispositions) {
            self.settle(entry, disposition).await;
        }
    }

    async fn settle(&self, entry: &StreamEntry, disposition: EntryDisposition) {
        match disposition {
            EntryDisposition::Ack => {
                if let Err(e) = self.queue.ack(&entry.stream, &entry.id).await {
                    error!(message_id = %entry.id, error = %e, "Failed to ack entry");
                }
            }
            EntryDisposition::Retry(err) => {
                match self.queue.increment_retry(&entry.stream, &entry.id).await {
                    Ok(attempts) if attempts >= self.queue.max_retries() => {
                        warn!(message_id = %entry.id, attempts, "Entry exceeded max retries");
                        self.dead_letter(entry, &err).await;
                    }
                    Ok(attempts) => {
                        warn!(
                            message_id = %entry.id,
                            attempts,
                            error = %err,
                            "Entry failed, left pending for redelivery"
                        );
                    }
                    Err(e) => {
                        error!(message_id = %entry.id, error = %e, "Failed to record retry");
                    }
                }
            }
            EntryDisposition::DeadLetter(err) => self.dead_letter(entry, &err).await,
        }
    }

    async fn dead_letter(&self, entry: &StreamEntry, err: &WorkerError) {
        match self.queue.dead_letter(entry, &err.to_string()).await {
            Ok(()) => metrics::record_dead_lettered(&entry.stream),
            Err(e) => {
                error!(message_id = %entry.id, error = %e, "Failed to dead-letter entry");
            }
        }
    }
}

//! Ingestion of uploaded videos.
//!
//! Each upload event runs one unit: resolve metadata, seed the entity, then
//! publish the work item. The publish only happens after the seed is
//! committed, and a failed publish reverts the seed, so the store and the
//! work stream never disagree about whether a video was ingested.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn, Instrument};

use vtrack_models::{ModelResult, StorageLocation, TrackedVideo, UploadEvent, VideoId, WorkItem};

use crate::error::WorkerError;
use crate::metrics;
use crate::ports::{EntityStore, SeedResult, WorkItemPublisher};
use crate::resolver::MetadataResolver;

/// Result of one ingestion unit.
#[derive(Debug)]
pub enum UnitOutcome {
    /// Seed committed and work item published.
    Committed(VideoId),
    /// The entity already left QUEUED; this event is a redelivery.
    AlreadyIngested(VideoId),
    /// Nothing persisted; redelivery may succeed.
    AbortedRetryable(WorkerError),
    /// Nothing persisted; redelivery will fail the same way.
    AbortedFatal(WorkerError),
}

impl UnitOutcome {
    fn aborted(error: WorkerError) -> Self {
        if error.is_retryable() {
            UnitOutcome::AbortedRetryable(error)
        } else {
            UnitOutcome::AbortedFatal(error)
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(
            self,
            UnitOutcome::Committed(_) | UnitOutcome::AlreadyIngested(_)
        )
    }
}

/// An event whose unit aborted.
#[derive(Debug)]
pub struct IngestFailure {
    /// Position of the event in the batch
    pub index: usize,
    /// `None` when the record could not be decoded
    pub location: Option<StorageLocation>,
    pub error: WorkerError,
}

impl IngestFailure {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

/// Summary of a batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Events that took effect, redeliveries included
    pub processed: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs ingestion units for upload events.
#[derive(Clone)]
pub struct IngestionCoordinator {
    resolver: MetadataResolver,
    store: Arc<dyn EntityStore>,
    publisher: Arc<dyn WorkItemPublisher>,
}

impl IngestionCoordinator {
    pub fn new(
        resolver: MetadataResolver,
        store: Arc<dyn EntityStore>,
        publisher: Arc<dyn WorkItemPublisher>,
    ) -> Self {
        Self {
            resolver,
            store,
            publisher,
        }
    }

    /// Ingest every event in the batch. A failed event never stops the
    /// ones after it.
    pub async fn handle(&self, events: &[UploadEvent]) -> IngestReport {
        let mut report = IngestReport::default();
        for (index, event) in events.iter().enumerate() {
            self.ingest_into(&mut report, index, event).await;
        }
        report
    }

    /// Like [`Self::handle`] for records decoded one by one. A record that
    /// failed to decode is reported at its position; the others still run.
    pub async fn handle_records(&self, records: Vec<ModelResult<UploadEvent>>) -> IngestReport {
        let mut report = IngestReport::default();

        for (index, record) in records.into_iter().enumerate() {
            match record {
                Ok(event) => self.ingest_into(&mut report, index, &event).await,
                Err(e) => {
                    metrics::record_ingest_failure(false);
                    warn!(index, error = %e, "Undecodable upload record");
                    report.failures.push(IngestFailure {
                        index,
                        location: None,
                        error: e.into(),
                    });
                }
            }
        }

        report
    }

    async fn ingest_into(&self, report: &mut IngestReport, index: usize, event: &UploadEvent) {
        match self.ingest(event).await {
            UnitOutcome::Committed(_) | UnitOutcome::AlreadyIngested(_) => {
                report.processed += 1;
            }
            UnitOutcome::AbortedRetryable(error) | UnitOutcome::AbortedFatal(error) => {
                report.failures.push(IngestFailure {
                    index,
                    location: Some(event.location.clone()),
                    error,
                });
            }
        }
    }

    /// Run the ingestion unit for one event.
    pub async fn ingest(&self, event: &UploadEvent) -> UnitOutcome {
        let location = &event.location;
        let span = info_span!("ingest", container = %location.container, key = %location.object_key);

        let outcome = async {
            let resolved = match self.resolver.resolve(location).await {
                Ok(resolved) => resolved,
                Err(e) => return UnitOutcome::aborted(e.into()),
            };

            let seed = TrackedVideo::seed(
                resolved.identity(location),
                location.clone(),
                resolved.video_hash.clone(),
                resolved.owner_id.clone(),
                Utc::now(),
            );

            self.run_unit(seed, resolved.timestamp).await
        }
        .instrument(span)
        .await;

        match &outcome {
            UnitOutcome::Committed(id) => {
                metrics::record_ingested(false);
                info!(video_id = %id, location = %location, "Ingested upload");
            }
            UnitOutcome::AlreadyIngested(id) => {
                metrics::record_ingested(true);
                info!(video_id = %id, location = %location, "Upload already ingested, skipping");
            }
            UnitOutcome::AbortedRetryable(e) => {
                metrics::record_ingest_failure(true);
                warn!(location = %location, error = %e, "Ingestion aborted, will be retried");
            }
            UnitOutcome::AbortedFatal(e) => {
                metrics::record_ingest_failure(false);
                error!(location = %location, error = %e, "Ingestion aborted permanently");
            }
        }

        outcome
    }

    async fn run_unit(&self, seed: TrackedVideo, uploaded_at: DateTime<Utc>) -> UnitOutcome {
        let video_id = seed.video_id.clone();

        let (previous, version) = match self.store.seed(&seed).await {
            Ok(SeedResult::Created { version }) => (None, version),
            Ok(SeedResult::Replaced { previous, version }) => (Some(previous), version),
            Ok(SeedResult::AlreadyProgressed(_)) => return UnitOutcome::AlreadyIngested(video_id),
            Err(e) => return UnitOutcome::aborted(e.into()),
        };

        let item = WorkItem::for_video(&seed, uploaded_at);
        match self.publisher.publish_work_item(&item).await {
            Ok(()) => UnitOutcome::Committed(video_id),
            Err(publish_error) => {
                self.compensate(&video_id, previous.as_deref(), &version).await;
                UnitOutcome::aborted(WorkerError::Publish(publish_error))
            }
        }
    }

    /// Revert the seed of a unit whose publish failed. A failed revert
    /// leaves a QUEUED record behind, which the redelivered event re-seeds.
    async fn compensate(&self, video_id: &VideoId, previous: Option<&TrackedVideo>, version: &str) {
        match self.store.revert_seed(video_id, previous, version).await {
            Ok(reverted) => {
                metrics::record_compensation(true);
                info!(video_id = %video_id, reverted, "Compensated seed after failed publish");
            }
            Err(e) => {
                metrics::record_compensation(false);
                error!(video_id = %video_id, error = %e, "Seed compensation failed");
            }
        }
    }
}

//! Progress message processing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use vtrack_models::{ProgressUpdate, TrackedVideo};

use crate::error::WorkerError;
use crate::metrics;
use crate::notifier::NotificationEmitter;
use crate::ports::{EntityStore, MergeResult};

/// Why a message was dropped without touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Body failed validation
    Malformed,
    /// Body carried no mergeable field
    Empty,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Malformed => "malformed",
            SkipReason::Empty => "empty",
        }
    }
}

/// Result of one progress message that needs no redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// The entity changed.
    Updated { notified: bool },
    /// The entity already held every value, or was already terminal.
    Unchanged { notified: bool },
    /// No entity with that ID.
    NotFound,
    Skipped(SkipReason),
}

impl ProgressOutcome {
    pub fn notified(&self) -> bool {
        matches!(
            self,
            ProgressOutcome::Updated { notified: true } | ProgressOutcome::Unchanged { notified: true }
        )
    }
}

/// A message that must be redelivered.
#[derive(Debug)]
pub struct ProgressFailure {
    /// The merge was committed before the failure
    pub updated: bool,
    pub error: WorkerError,
}

impl ProgressFailure {
    fn before_merge(error: impl Into<WorkerError>) -> Self {
        Self {
            updated: false,
            error: error.into(),
        }
    }
}

/// Summary of a batch.
#[derive(Debug, Default)]
pub struct ProgressReport {
    /// Entities changed, including those whose notification then failed
    pub updated: usize,
    pub notified: usize,
    pub skipped: usize,
    pub not_found: usize,
    /// Failed messages by batch position
    pub failures: Vec<(usize, ProgressFailure)>,
}

/// Applies progress messages to tracked videos.
#[derive(Clone)]
pub struct ProgressUpdateProcessor {
    store: Arc<dyn EntityStore>,
    emitter: NotificationEmitter,
}

impl ProgressUpdateProcessor {
    pub fn new(store: Arc<dyn EntityStore>, emitter: NotificationEmitter) -> Self {
        Self { store, emitter }
    }

    /// Process a batch of message bodies one by one.
    pub async fn handle<S: AsRef<str>>(&self, bodies: &[S]) -> ProgressReport {
        let mut report = ProgressReport::default();

        for (index, body) in bodies.iter().enumerate() {
            match self.process(body.as_ref()).await {
                Ok(outcome) => {
                    match outcome {
                        ProgressOutcome::Updated { .. } => report.updated += 1,
                        ProgressOutcome::Unchanged { .. } => {}
                        ProgressOutcome::NotFound => report.not_found += 1,
                        ProgressOutcome::Skipped(_) => report.skipped += 1,
                    }
                    if outcome.notified() {
                        report.notified += 1;
                    }
                }
                Err(failure) => {
                    if failure.updated {
                        report.updated += 1;
                    }
                    report.failures.push((index, failure));
                }
            }
        }

        debug!(
            updated = report.updated,
            notified = report.notified,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Processed progress batch"
        );
        report
    }

    /// Process one message body.
    pub async fn process(&self, body: &str) -> Result<ProgressOutcome, ProgressFailure> {
        let update = match ProgressUpdate::parse(body) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "Skipping malformed progress message");
                return Ok(self.skip(SkipReason::Malformed));
            }
        };

        if update.is_empty() {
            debug!(video_id = %update.video_id, "Skipping progress message with nothing to merge");
            return Ok(self.skip(SkipReason::Empty));
        }

        let merged = self
            .store
            .merge_progress(&update, Utc::now())
            .await
            .map_err(ProgressFailure::before_merge)?;

        let (video, effect) = match merged {
            MergeResult::NotFound => {
                info!(video_id = %update.video_id, "Progress for unknown video, ignoring");
                return Ok(ProgressOutcome::NotFound);
            }
            MergeResult::Merged { video, effect } => (video, effect),
        };

        let updated = effect.is_updated();
        if updated {
            metrics::record_progress_update(effect.entered_terminal());
            info!(
                video_id = %video.video_id,
                status = %video.status,
                progress = video.progress,
                "Applied progress update"
            );
        }

        let notified = self
            .settle_notification(&video)
            .await
            .map_err(|error| ProgressFailure { updated, error })?;

        Ok(if updated {
            ProgressOutcome::Updated { notified }
        } else {
            ProgressOutcome::Unchanged { notified }
        })
    }

    /// Publish the pending terminal notification of `video`, if any, then
    /// clear the marker. Returns whether a notification went out.
    async fn settle_notification(&self, video: &TrackedVideo) -> Result<bool, WorkerError> {
        if !(video.is_terminal() && video.notification_pending) {
            return Ok(false);
        }

        if let Err(e) = self.emitter.notify(video).await {
            metrics::record_notification("failed");
            warn!(video_id = %video.video_id, error = %e, "Terminal notification failed");
            return Err(e);
        }
        metrics::record_notification("sent");

        // A failed clear only costs a repeat publish, which the
        // notification's idempotency key collapses.
        if let Err(e) = self.store.clear_notification_pending(&video.video_id).await {
            warn!(video_id = %video.video_id, error = %e, "Failed to clear pending notification");
        }
        Ok(true)
    }

    fn skip(&self, reason: SkipReason) -> ProgressOutcome {
        metrics::record_skipped(reason.as_str());
        ProgressOutcome::Skipped(reason)
    }
}

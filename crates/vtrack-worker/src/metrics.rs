//! Pipeline metrics.

use metrics::counter;

/// Metric name constants.
pub mod names {
    /// Upload events that completed ingestion (including redeliveries).
    pub const UPLOADS_INGESTED_TOTAL: &str = "vtrack_uploads_ingested_total";

    /// Upload events whose ingestion unit aborted, by retryability.
    pub const UPLOADS_FAILED_TOTAL: &str = "vtrack_uploads_failed_total";

    /// Seed compensations after a failed work-item publish.
    pub const INGEST_COMPENSATIONS_TOTAL: &str = "vtrack_ingest_compensations_total";

    /// Entities changed by a progress message.
    pub const PROGRESS_UPDATES_TOTAL: &str = "vtrack_progress_updates_total";

    /// Terminal notifications, by outcome.
    pub const NOTIFICATIONS_TOTAL: &str = "vtrack_notifications_total";

    /// Messages dropped without effect, by reason.
    pub const MESSAGES_SKIPPED_TOTAL: &str = "vtrack_messages_skipped_total";

    /// Stream entries moved to the dead letter stream, by source stream.
    pub const DEAD_LETTERED_TOTAL: &str = "vtrack_dead_lettered_total";
}

pub fn record_ingested(already_ingested: bool) {
    let outcome = if already_ingested { "redelivery" } else { "committed" };
    counter!(names::UPLOADS_INGESTED_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_ingest_failure(retryable: bool) {
    let kind = if retryable { "retryable" } else { "fatal" };
    counter!(names::UPLOADS_FAILED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_compensation(reverted: bool) {
    let outcome = if reverted { "reverted" } else { "failed" };
    counter!(names::INGEST_COMPENSATIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_progress_update(entered_terminal: bool) {
    counter!(
        names::PROGRESS_UPDATES_TOTAL,
        "terminal" => entered_terminal.to_string()
    )
    .increment(1);
}

pub fn record_notification(outcome: &'static str) {
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_skipped(reason: &'static str) {
    counter!(names::MESSAGES_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_dead_lettered(stream: &str) {
    counter!(names::DEAD_LETTERED_TOTAL, "stream" => stream.to_string()).increment(1);
}

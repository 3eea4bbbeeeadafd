//! Ingestion and progress tests against in-memory ports.

mod common;

use std::sync::atomic::Ordering;

use common::{s3_event, uploaded_at, video, Pipeline};
use vtrack_models::{parse_upload_events, StorageLocation, UploadEvent, VideoId, VideoStatus};
use vtrack_worker::{ProgressOutcome, SkipReason, UnitOutcome, WorkerError};

fn upload(container: &str, key: &str) -> UploadEvent {
    parse_upload_events(&s3_event(container, key))
        .unwrap()
        .remove(0)
        .unwrap()
}

// --- ingestion ---

#[tokio::test]
async fn test_upload_without_video_id_gets_generated_identifier() {
    let p = Pipeline::new();
    p.objects.put("videos", "a.mp4", &[("owner_id", "u1")], "etag-1");

    let id = match p.coordinator.ingest(&upload("videos", "a.mp4")).await {
        UnitOutcome::Committed(id) => id,
        other => panic!("expected commit, got {:?}", other),
    };

    let entity = p.store.get(id.as_str()).unwrap();
    assert_eq!(entity.status, VideoStatus::Queued);
    assert_eq!(entity.progress, 0.0);
    assert_eq!(entity.owner_id.as_deref(), Some("u1"));
    assert_eq!(entity.source_location, StorageLocation::new("videos", "a.mp4"));

    let items = p.publisher.work_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].video_id, id);
    assert_eq!(items[0].container, "videos");
    assert_eq!(items[0].key, "a.mp4");
    assert_eq!(items[0].timestamp, uploaded_at());

    // Redelivery of the same event lands on the same entity and the
    // republished work item is suppressed.
    let again = p.coordinator.ingest(&upload("videos", "a.mp4")).await;
    assert!(matches!(again, UnitOutcome::Committed(ref same) if *same == id));
    assert_eq!(p.store.len(), 1);
    assert_eq!(p.publisher.work_items().len(), 1);
}

#[tokio::test]
async fn test_upstream_video_id_is_used() {
    let p = Pipeline::new();
    p.objects.put(
        "videos",
        "clips/my clip.mp4",
        &[("video_id", "vid-42"), ("video_hash", "abc"), ("owner_id", "u7")],
        "etag-1",
    );

    let outcome = p.coordinator.ingest(&upload("videos", "clips/my+clip.mp4")).await;
    assert!(matches!(outcome, UnitOutcome::Committed(ref id) if id.as_str() == "vid-42"));

    let item = &p.publisher.work_items()[0];
    assert_eq!(item.video_hash.as_deref(), Some("abc"));
    assert_eq!(item.owner_id.as_deref(), Some("u7"));
    assert_eq!(item.key, "clips/my clip.mp4");
}

#[tokio::test]
async fn test_redelivery_after_processing_started_is_absorbed() {
    let p = Pipeline::new();
    p.objects.put("videos", "a.mp4", &[("video_id", "v1")], "etag-1");
    let mut existing = video("v1", VideoStatus::Processing, Some("u1"));
    existing.progress = 40.0;
    p.store.insert(existing.clone());

    let outcome = p.coordinator.ingest(&upload("videos", "a.mp4")).await;

    assert!(matches!(outcome, UnitOutcome::AlreadyIngested(_)));
    assert!(outcome.is_processed());
    assert_eq!(p.store.get("v1"), Some(existing));
    assert!(p.publisher.work_items().is_empty());
}

#[tokio::test]
async fn test_enqueue_failure_removes_new_seed() {
    let p = Pipeline::new();
    p.objects.put("videos", "a.mp4", &[("video_id", "v1")], "etag-1");
    p.publisher.fail_work_items.store(true, Ordering::SeqCst);

    let outcome = p.coordinator.ingest(&upload("videos", "a.mp4")).await;

    assert!(matches!(
        outcome,
        UnitOutcome::AbortedRetryable(WorkerError::Publish(_))
    ));
    assert_eq!(p.store.len(), 0);
}

#[tokio::test]
async fn test_enqueue_failure_restores_previous_seed() {
    let p = Pipeline::new();
    p.objects.put("videos", "a.mp4", &[("video_id", "v1")], "etag-1");
    let mut previous = video("v1", VideoStatus::Queued, None);
    previous.video_hash = Some("old-hash".into());
    p.store.insert(previous.clone());
    p.publisher.fail_work_items.store(true, Ordering::SeqCst);

    let outcome = p.coordinator.ingest(&upload("videos", "a.mp4")).await;

    assert!(matches!(outcome, UnitOutcome::AbortedRetryable(_)));
    assert_eq!(p.store.get("v1"), Some(previous));
}

#[tokio::test]
async fn test_failed_event_does_not_stop_the_batch() {
    let p = Pipeline::new();
    p.objects.put("videos", "1.mp4", &[], "e1");
    p.objects.put("videos", "3.mp4", &[], "e3");
    let events = vec![
        upload("videos", "1.mp4"),
        upload("videos", "2.mp4"),
        upload("videos", "3.mp4"),
    ];

    let report = p.coordinator.handle(&events).await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(
        report.failures[0].location,
        Some(StorageLocation::new("videos", "2.mp4"))
    );
    // The object may only be missing because the store is lagging.
    assert!(report.failures[0].is_retryable());
    assert_eq!(p.store.len(), 2);
    assert_eq!(p.publisher.work_items().len(), 2);
}

#[tokio::test]
async fn test_undecodable_record_does_not_drop_its_siblings() {
    let p = Pipeline::new();
    p.objects.put("videos", "good.mp4", &[("video_id", "good")], "e1");
    p.objects.put("videos", "also good.mp4", &[("video_id", "also-good")], "e2");
    let body = r#"{"Records":[
        {"s3":{"bucket":{"name":"videos"},"object":{"key":"good.mp4"}}},
        {"s3":{"bucket":{"name":"videos"},"object":{"key":"bad%FF.mp4"}}},
        {"s3":{"bucket":{"name":"videos"},"object":{"key":"also+good.mp4"}}}
    ]}"#;

    let report = p
        .coordinator
        .handle_records(parse_upload_events(body).unwrap())
        .await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(report.failures[0].location.is_none());
    assert!(matches!(report.failures[0].error, WorkerError::Parse(_)));
    assert!(p.store.get("good").is_some());
    assert!(p.store.get("also-good").is_some());
    assert_eq!(p.publisher.work_items().len(), 2);
}

#[tokio::test]
async fn test_redelivered_upload_keeps_merged_progress() {
    let p = Pipeline::new();
    p.objects.put("videos", "a.mp4", &[("video_id", "v1"), ("owner_id", "u1")], "e1");

    let first = p.coordinator.ingest(&upload("videos", "a.mp4")).await;
    assert!(matches!(first, UnitOutcome::Committed(_)));
    p.processor
        .process(r#"{"video_id":"v1","progress":30,"message":"downloading"}"#)
        .await
        .unwrap();
    let merged = p.store.get("v1").unwrap();

    let again = p.coordinator.ingest(&upload("videos", "a.mp4")).await;
    assert!(matches!(again, UnitOutcome::Committed(_)));

    let after = p.store.get("v1").unwrap();
    assert_eq!(after.status, VideoStatus::Queued);
    assert_eq!(after.progress, 30.0);
    assert_eq!(after.message.as_deref(), Some("downloading"));
    assert_eq!(after.last_update, merged.last_update);
    assert_eq!(after.owner_id.as_deref(), Some("u1"));
    assert_eq!(p.publisher.work_items().len(), 1);
}

#[tokio::test]
async fn test_store_outage_aborts_without_publishing() {
    let p = Pipeline::new();
    p.objects.put("videos", "a.mp4", &[], "e1");
    p.store.unavailable.store(true, Ordering::SeqCst);

    let outcome = p.coordinator.ingest(&upload("videos", "a.mp4")).await;

    assert!(matches!(
        outcome,
        UnitOutcome::AbortedRetryable(WorkerError::Store(_))
    ));
    assert!(p.publisher.work_items().is_empty());
}

// --- progress ---

#[tokio::test]
async fn test_completed_message_finishes_video_and_notifies_once() {
    let p = Pipeline::new();
    let before = video("v1", VideoStatus::Processing, Some("u1"));
    p.store.insert(before.clone());

    let outcome = p
        .processor
        .process(r#"{"video_id":"v1","status":"COMPLETED","progress":100}"#)
        .await
        .unwrap();

    assert_eq!(outcome, ProgressOutcome::Updated { notified: true });

    let after = p.store.get("v1").unwrap();
    assert_eq!(after.status, VideoStatus::Completed);
    assert_eq!(after.progress, 100.0);
    assert!(after.last_update > before.last_update);
    assert!(!after.notification_pending);

    let sent = p.publisher.notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].video_id, VideoId::from("v1"));
    assert_eq!(sent[0].owner_id.as_deref(), Some("u1"));
    assert_eq!(sent[0].status, VideoStatus::Completed);
}

#[tokio::test]
async fn test_full_lifecycle_fires_one_notification_on_completion() {
    let p = Pipeline::new();
    p.store.insert(video("v1", VideoStatus::Queued, Some("u1")));

    let processing = p
        .processor
        .process(r#"{"video_id":"v1","status":"PROCESSING","progress":10}"#)
        .await
        .unwrap();
    assert_eq!(processing, ProgressOutcome::Updated { notified: false });
    assert!(p.publisher.notifications().is_empty());

    p.processor
        .process(r#"{"video_id":"v1","progress":60}"#)
        .await
        .unwrap();
    assert!(p.publisher.notifications().is_empty());

    let completed = p
        .processor
        .process(
            r#"{"video_id":"v1","status":"COMPLETED","progress":100,
                "result_location":{"container":"results","object_key":"v1.zip"}}"#,
        )
        .await
        .unwrap();
    assert!(completed.notified());

    let sent = p.publisher.notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].result_location,
        Some(StorageLocation::new("results", "v1.zip"))
    );
}

#[tokio::test]
async fn test_same_message_twice_converges() {
    let p = Pipeline::new();
    p.store.insert(video("v1", VideoStatus::Processing, None));
    let body = r#"{"video_id":"v1","progress":55,"message":"rendering"}"#;

    let first = p.processor.process(body).await.unwrap();
    let once = p.store.get("v1").unwrap();
    let second = p.processor.process(body).await.unwrap();
    let twice = p.store.get("v1").unwrap();

    assert_eq!(first, ProgressOutcome::Updated { notified: false });
    assert_eq!(second, ProgressOutcome::Unchanged { notified: false });
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_progress_only_message_keeps_status_and_result() {
    let p = Pipeline::new();
    let mut before = video("v1", VideoStatus::Processing, None);
    before.result_location = Some(StorageLocation::new("results", "partial.zip"));
    p.store.insert(before);

    p.processor
        .process(r#"{"video_id":"v1","progress":70}"#)
        .await
        .unwrap();

    let after = p.store.get("v1").unwrap();
    assert_eq!(after.progress, 70.0);
    assert_eq!(after.status, VideoStatus::Processing);
    assert_eq!(
        after.result_location,
        Some(StorageLocation::new("results", "partial.zip"))
    );
}

#[tokio::test]
async fn test_late_message_for_finished_video_is_a_no_op() {
    let p = Pipeline::new();
    let finished = video("v1", VideoStatus::Failed, Some("u1"));
    p.store.insert(finished.clone());

    let outcome = p
        .processor
        .process(r#"{"video_id":"v1","status":"PROCESSING","progress":20}"#)
        .await
        .unwrap();

    assert_eq!(outcome, ProgressOutcome::Unchanged { notified: false });
    assert_eq!(p.store.get("v1"), Some(finished));
    assert!(p.publisher.notifications().is_empty());
}

#[tokio::test]
async fn test_failed_notification_is_resent_on_redelivery() {
    let p = Pipeline::new();
    p.store.insert(video("v1", VideoStatus::Processing, Some("u1")));
    let body = r#"{"video_id":"v1","status":"FAILED","message":"decoder crashed"}"#;

    p.publisher.fail_notifications.store(true, Ordering::SeqCst);
    let failure = p.processor.process(body).await.unwrap_err();
    assert!(failure.updated);
    assert!(failure.error.is_retryable());

    let stuck = p.store.get("v1").unwrap();
    assert_eq!(stuck.status, VideoStatus::Failed);
    assert!(stuck.notification_pending);

    p.publisher.fail_notifications.store(false, Ordering::SeqCst);
    let retried = p.processor.process(body).await.unwrap();

    assert_eq!(retried, ProgressOutcome::Unchanged { notified: true });
    assert!(!p.store.get("v1").unwrap().notification_pending);
    let sent = p.publisher.notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message.as_deref(), Some("decoder crashed"));
}

#[tokio::test]
async fn test_batch_counts_and_isolation() {
    let p = Pipeline::new();
    p.store.insert(video("v1", VideoStatus::Processing, None));
    p.store.insert(video("v2", VideoStatus::Processing, None));

    let bodies = vec![
        r#"{"video_id":"v1","progress":10}"#,
        "not json",
        r#"{"video_id":"v2","status":"COMPLETED"}"#,
        r#"{"video_id":"ghost","progress":5}"#,
        r#"{"video_id":"v1"}"#,
        r#"{"video_id":"v2","status":"SHIPPED"}"#,
    ];

    let report = p.processor.handle(&bodies).await;

    assert_eq!(report.updated, 2);
    assert_eq!(report.notified, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.not_found, 1);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_store_outage_fails_only_affected_messages() {
    let p = Pipeline::new();
    p.store.insert(video("v1", VideoStatus::Processing, None));
    p.store.unavailable.store(true, Ordering::SeqCst);

    let report = p
        .processor
        .handle(&[r#"{"video_id":"v1","progress":10}"#, "{}"])
        .await;

    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, 0);
    assert!(!report.failures[0].1.updated);
}

#[tokio::test]
async fn test_message_without_fields_is_skipped() {
    let p = Pipeline::new();
    p.store.insert(video("v1", VideoStatus::Processing, None));

    let outcome = p.processor.process(r#"{"video_id":"v1"}"#).await.unwrap();
    assert_eq!(outcome, ProgressOutcome::Skipped(SkipReason::Empty));

    let outcome = p.processor.process(r#"{"progress":10}"#).await.unwrap();
    assert_eq!(outcome, ProgressOutcome::Skipped(SkipReason::Malformed));
}

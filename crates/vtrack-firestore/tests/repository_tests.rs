//! Firestore integration tests.

use chrono::Utc;

use vtrack_firestore::{FirestoreClient, MergeResult, SeedResult, TrackedVideoRepository};
use vtrack_models::{ProgressUpdate, StorageLocation, TrackedVideo, VideoId, VideoStatus};

async fn repository() -> TrackedVideoRepository {
    dotenvy::dotenv().ok();
    let client = FirestoreClient::from_env()
        .await
        .expect("Failed to create Firestore client");
    TrackedVideoRepository::new(client, "tracked_videos_integration")
}

fn seed(id: &VideoId) -> TrackedVideo {
    TrackedVideo::seed(
        id.clone(),
        StorageLocation::new("videos", "integration.mp4"),
        None,
        Some("test_user_integration".to_string()),
        Utc::now(),
    )
}

/// Seed, merge to a terminal status, then check redelivery handling.
#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_seed_and_merge_lifecycle() {
    let repo = repository().await;
    let id = VideoId::new();

    let seeded = repo.seed(&seed(&id)).await.expect("Failed to seed");
    assert!(matches!(seeded, SeedResult::Created { .. }));

    let update = ProgressUpdate::parse(&format!(
        r#"{{"video_id":"{}","status":"COMPLETED","progress":100}}"#,
        id
    ))
    .unwrap();
    let merged = repo.merge_progress(&update, Utc::now()).await.expect("Failed to merge");
    let MergeResult::Merged { video, effect } = merged else {
        panic!("video {} not found after seeding", id);
    };
    assert!(effect.entered_terminal());
    assert!(video.notification_pending);

    repo.clear_notification_pending(&id).await.expect("Failed to clear flag");
    let stored = repo.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, VideoStatus::Completed);
    assert!(!stored.notification_pending);

    let again = repo.seed(&seed(&id)).await.expect("Failed to reseed");
    assert!(matches!(again, SeedResult::AlreadyProgressed(_)));
}

/// A revert only applies while the record still carries the seeded version.
#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_revert_is_guarded_by_version() {
    let repo = repository().await;
    let id = VideoId::new();

    let SeedResult::Created { version } = repo.seed(&seed(&id)).await.unwrap() else {
        panic!("expected a fresh seed");
    };

    let update = ProgressUpdate::parse(&format!(r#"{{"video_id":"{}","progress":5}}"#, id)).unwrap();
    repo.merge_progress(&update, Utc::now()).await.unwrap();

    assert!(!repo.revert_seed(&id, None, &version).await.unwrap());
    assert!(repo.get(&id).await.unwrap().is_some());
}

//! Redis status store integration tests.

use vidflow_models::{Stage, StageState, Video, VideoId, VideoStatus};
use vidflow_status::{RedisStatusStore, StatusStore};

fn store() -> RedisStatusStore {
    dotenvy::dotenv().ok();
    let url = std::env::var("BROKER_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisStatusStore::new(&url, "test-video").expect("Failed to create status store")
}

fn fresh_video() -> Video {
    let id = VideoId::new();
    let source = format!("raw/{}.mp4", id);
    Video::uploaded(id, source)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_insert_and_find() {
    let store = store();
    let video = fresh_video();

    assert!(store.insert(&video).await.unwrap());
    assert!(!store.insert(&video).await.unwrap());

    let found = store.find(&video.id).await.unwrap().expect("record");
    assert_eq!(found.status, VideoStatus::Uploaded);
    assert_eq!(found.source_object, video.source_object);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_compare_and_set_is_exclusive() {
    let store = store();
    let video = fresh_video();
    store.insert(&video).await.unwrap();

    let first = store
        .compare_and_set_status(&video.id, VideoStatus::Uploaded, VideoStatus::Trimming)
        .await
        .unwrap();
    let second = store
        .compare_and_set_status(&video.id, VideoStatus::Uploaded, VideoStatus::Trimming)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_complete_and_stage_state() {
    let store = store();
    let mut video = fresh_video();
    video.status = VideoStatus::AddingIntroOutro;
    store.insert(&video).await.unwrap();

    store
        .update_stage_state(&video.id, Stage::IntroOutro, StageState::Succeeded)
        .await
        .unwrap();
    assert!(store
        .complete(&video.id, VideoStatus::AddingIntroOutro, "processed/v.mp4")
        .await
        .unwrap());

    let found = store.find(&video.id).await.unwrap().expect("record");
    assert_eq!(found.status, VideoStatus::Processed);
    assert_eq!(found.processed_object.as_deref(), Some("processed/v.mp4"));
    assert_eq!(found.stage_state, Some(StageState::Succeeded));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_missing_video() {
    let store = store();
    let id = VideoId::new();
    assert!(store.find(&id).await.unwrap().is_none());
    assert!(store
        .update_stage_state(&id, Stage::Trim, StageState::Running)
        .await
        .unwrap_err()
        .is_not_found());
}

//! In-memory status store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use vidflow_models::{Stage, StageState, Video, VideoId, VideoStatus};

use crate::error::{StatusError, StatusResult};
use crate::{ensure_forward, StatusStore};

/// Status store held in memory. Every operation takes the write lock, so
/// compare-and-set is atomic with respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    videos: RwLock<HashMap<VideoId, Video>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of `id`, if recorded.
    pub async fn status_of(&self, id: &VideoId) -> Option<VideoStatus> {
        self.videos.read().await.get(id).map(|v| v.status)
    }

    async fn swap(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        next: VideoStatus,
        processed_object: Option<&str>,
    ) -> StatusResult<bool> {
        ensure_forward(expected, next)?;
        let mut videos = self.videos.write().await;
        let video = videos
            .get_mut(id)
            .ok_or_else(|| StatusError::not_found(id.as_str()))?;
        if video.status != expected {
            return Ok(false);
        }

        let now = Utc::now();
        video.status = next;
        video.updated_at = now;
        if let Some(object) = processed_object {
            video.processed_object = Some(object.to_string());
            video.processed_at = Some(now);
        }
        Ok(true)
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn find(&self, id: &VideoId) -> StatusResult<Option<Video>> {
        Ok(self.videos.read().await.get(id).cloned())
    }

    async fn insert(&self, video: &Video) -> StatusResult<bool> {
        let mut videos = self.videos.write().await;
        if videos.contains_key(&video.id) {
            return Ok(false);
        }
        videos.insert(video.id.clone(), video.clone());
        Ok(true)
    }

    async fn compare_and_set_status(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        next: VideoStatus,
    ) -> StatusResult<bool> {
        self.swap(id, expected, next, None).await
    }

    async fn complete(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        processed_object: &str,
    ) -> StatusResult<bool> {
        self.swap(id, expected, VideoStatus::Processed, Some(processed_object))
            .await
    }

    async fn update_stage_state(
        &self,
        id: &VideoId,
        stage: Stage,
        state: StageState,
    ) -> StatusResult<()> {
        let mut videos = self.videos.write().await;
        let video = videos
            .get_mut(id)
            .ok_or_else(|| StatusError::not_found(id.as_str()))?;
        video.last_stage = Some(stage);
        video.stage_state = Some(state);
        video.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(id: &str, status: VideoStatus) -> MemoryStatusStore {
        let store = MemoryStatusStore::new();
        let mut video = Video::uploaded(id, format!("raw/{}.mp4", id));
        video.status = status;
        store.insert(&video).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_is_create_only() {
        let store = MemoryStatusStore::new();
        let video = Video::uploaded("v-1", "raw/v-1.mp4");
        assert!(store.insert(&video).await.unwrap());
        assert!(!store.insert(&video).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_set_advances() {
        let store = store_with("v-1", VideoStatus::Uploaded).await;
        let id = VideoId::from("v-1");

        assert!(store
            .compare_and_set_status(&id, VideoStatus::Uploaded, VideoStatus::Trimming)
            .await
            .unwrap());
        assert_eq!(store.status_of(&id).await, Some(VideoStatus::Trimming));
    }

    #[tokio::test]
    async fn test_compare_and_set_loses_race() {
        let store = store_with("v-1", VideoStatus::AdjustingResolution).await;
        let id = VideoId::from("v-1");

        let swapped = store
            .compare_and_set_status(&id, VideoStatus::Trimming, VideoStatus::AdjustingResolution)
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(store.status_of(&id).await, Some(VideoStatus::AdjustingResolution));
    }

    #[tokio::test]
    async fn test_refuses_backward_and_terminal_moves() {
        let store = store_with("v-1", VideoStatus::Failed).await;
        let id = VideoId::from("v-1");

        let err = store
            .compare_and_set_status(&id, VideoStatus::AddingWatermark, VideoStatus::Trimming)
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::InvalidTransition { .. }));

        let err = store
            .compare_and_set_status(&id, VideoStatus::Failed, VideoStatus::Processed)
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_complete_records_output() {
        let store = store_with("v-1", VideoStatus::AddingIntroOutro).await;
        let id = VideoId::from("v-1");

        assert!(store
            .complete(&id, VideoStatus::AddingIntroOutro, "processed/v-1.mp4")
            .await
            .unwrap());
        let video = store.find(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Processed);
        assert_eq!(video.processed_object.as_deref(), Some("processed/v-1.mp4"));
        assert!(video.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_stage_state_leaves_status_alone() {
        let store = store_with("v-1", VideoStatus::Trimming).await;
        let id = VideoId::from("v-1");

        store
            .update_stage_state(&id, Stage::Trim, StageState::Failed)
            .await
            .unwrap();
        let video = store.find(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Trimming);
        assert_eq!(video.stage_state, Some(StageState::Failed));
        assert_eq!(video.last_stage, Some(Stage::Trim));
    }

    #[tokio::test]
    async fn test_unknown_video() {
        let store = MemoryStatusStore::new();
        let id = VideoId::from("ghost");
        assert!(store.find(&id).await.unwrap().is_none());
        let err = store
            .compare_and_set_status(&id, VideoStatus::Uploaded, VideoStatus::Trimming)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

//! Video status store.
//!
//! The store owns [`Video`] records. The orchestrator moves `status` forward
//! with compare-and-set; workers only record an advisory stage state.

pub mod error;
pub mod memory;
pub mod redis_store;

pub use error::{StatusError, StatusResult};
pub use memory::MemoryStatusStore;
pub use redis_store::RedisStatusStore;

use async_trait::async_trait;
use vidflow_models::{Stage, StageState, Video, VideoId, VideoStatus};

/// Durable record of each video's pipeline status.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn find(&self, id: &VideoId) -> StatusResult<Option<Video>>;

    /// Store a new record. Returns `false` if one already exists.
    async fn insert(&self, video: &Video) -> StatusResult<bool>;

    /// Move `status` from `expected` to `next`.
    ///
    /// Returns `false`, leaving the record untouched, when the stored status
    /// is no longer `expected`. Backward moves and moves out of terminal
    /// states are refused with [`StatusError::InvalidTransition`].
    async fn compare_and_set_status(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        next: VideoStatus,
    ) -> StatusResult<bool>;

    /// Move `status` from `expected` to `Processed` and record the output
    /// object, in one write.
    async fn complete(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        processed_object: &str,
    ) -> StatusResult<bool>;

    /// Record the advisory state of the stage a worker is running.
    async fn update_stage_state(
        &self,
        id: &VideoId,
        stage: Stage,
        state: StageState,
    ) -> StatusResult<()>;
}

/// Check a requested transition before touching the store.
pub fn ensure_forward(expected: VideoStatus, next: VideoStatus) -> StatusResult<()> {
    if expected.can_advance_to(next) {
        Ok(())
    } else {
        Err(StatusError::InvalidTransition {
            from: expected,
            to: next,
        })
    }
}

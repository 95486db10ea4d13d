//! Orchestrator error types.

use thiserror::Error;
use vidflow_models::{Stage, VideoId};

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Could not dispatch {stage} for {video_id}: {reason}")]
    DispatchFailed {
        video_id: VideoId,
        stage: Stage,
        reason: String,
    },

    #[error("Retry ledger error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Status store error: {0}")]
    Status(#[from] vidflow_status::StatusError),

    #[error("Queue error: {0}")]
    Queue(#[from] vidflow_queue::QueueError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl OrchestratorError {
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn dispatch_failed(video_id: &VideoId, stage: Stage, reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            video_id: video_id.clone(),
            stage,
            reason: reason.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether redelivering the event could help.
    ///
    /// An unknown video is left to the broker's retry budget: the record
    /// may simply not be visible yet. Only a malformed event is hopeless.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::InvalidMessage(_) | OrchestratorError::ConfigError(_)
        )
    }
}

impl From<OrchestratorError> for vidflow_queue::HandlerError {
    fn from(err: OrchestratorError) -> Self {
        if err.is_retryable() {
            vidflow_queue::HandlerError::retryable(err.to_string())
        } else {
            vidflow_queue::HandlerError::permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_video_goes_through_broker_retries() {
        assert!(OrchestratorError::VideoNotFound(VideoId::from("v-9")).is_retryable());
        assert!(!OrchestratorError::invalid_message("no stage").is_retryable());
    }
}

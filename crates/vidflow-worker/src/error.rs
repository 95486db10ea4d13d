//! Worker error types.

use thiserror::Error;
use vidflow_models::VideoId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Input object not found: {0}")]
    InputNotFound(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Failed to report outcome: {0}")]
    NotifyFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Status store error: {0}")]
    Status(#[from] vidflow_status::StatusError),

    #[error("Storage error: {0}")]
    Storage(#[from] vidflow_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vidflow_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vidflow_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether another delivery of the same message could succeed.
    ///
    /// Missing inputs and malformed messages never will. An unknown video
    /// may still be registered by the time the message comes back.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WorkerError::InputNotFound(_)
                | WorkerError::InvalidMessage(_)
                | WorkerError::ConfigError(_)
        )
    }
}

impl From<WorkerError> for vidflow_queue::HandlerError {
    fn from(err: WorkerError) -> Self {
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
    use vidflow_queue::HandlerError;

    #[test]
    fn test_classification() {
        assert!(WorkerError::VideoNotFound(VideoId::from("v-1")).is_retryable());
        assert!(!WorkerError::invalid_message("bad json").is_retryable());
        assert!(!WorkerError::InputNotFound("videos/raw/v-1.mp4".into()).is_retryable());
        assert!(WorkerError::DownloadFailed("timeout".into()).is_retryable());
        assert!(WorkerError::processing_failed("ffmpeg exited 1").is_retryable());
    }

    #[test]
    fn test_into_handler_error() {
        let err: HandlerError = WorkerError::invalid_message("bad json").into();
        assert!(!err.is_retryable());

        let err: HandlerError = WorkerError::UploadFailed("503".into()).into();
        assert!(err.is_retryable());
    }
}

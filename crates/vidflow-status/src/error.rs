//! Status store error types.

use thiserror::Error;
use vidflow_models::VideoStatus;

pub type StatusResult<T> = Result<T, StatusError>;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: VideoStatus, to: VideoStatus },

    #[error("Corrupt record for {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StatusError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StatusError::NotFound(_))
    }
}

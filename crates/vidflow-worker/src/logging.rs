//! Structured stage logging.
//!
//! Provides consistent, structured logging for one stage attempt with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vidflow_models::{sanitize_for_log, Stage, VideoId};

/// Logger for one stage attempt on one video.
#[derive(Debug, Clone)]
pub struct StageLogger {
    video_id: String,
    stage: Stage,
}

impl StageLogger {
    pub fn new(video_id: &VideoId, stage: Stage) -> Self {
        Self {
            video_id: sanitize_for_log(video_id.as_str()),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage started: {}", sanitize_for_log(message)
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage progress: {}", sanitize_for_log(message)
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage warning: {}", sanitize_for_log(message)
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage error: {}", sanitize_for_log(message)
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            stage = %self.stage,
            "Stage completed: {}", sanitize_for_log(message)
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Span covering the whole attempt.
    pub fn create_span(&self, retry_count: u32) -> Span {
        tracing::info_span!(
            "stage",
            video_id = %self.video_id,
            stage = %self.stage,
            retry_count
        )
    }
}

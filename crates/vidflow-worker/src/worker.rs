//! Stage execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use vidflow_media::{ProcessingCapability, Workspace};
use vidflow_models::{
    object_basename, Stage, StageMessage, StageOutcomeEvent, StageState, VideoId,
};
use vidflow_queue::{metrics, Attempt};
use vidflow_status::StatusStore;
use vidflow_storage::{validate_key, ObjectStore};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::StageLogger;
use crate::notifier::OutcomeNotifier;

/// Object key a stage writes its output to: `<stage prefix>/<input basename>`.
///
/// The key depends only on the stage and the input, so a redelivered message
/// overwrites the same object.
pub fn output_key(stage: Stage, input_key: &str) -> String {
    format!("{}/{}", stage.output_prefix(), object_basename(input_key))
}

/// Runs one pipeline stage for one message at a time.
pub struct StageWorker {
    stage: Stage,
    processor: Arc<dyn ProcessingCapability>,
    status: Arc<dyn StatusStore>,
    storage: Arc<dyn ObjectStore>,
    notifier: OutcomeNotifier,
    input_bucket: String,
    output_bucket: String,
    work_dir: PathBuf,
}

impl StageWorker {
    pub fn new(
        config: &WorkerConfig,
        processor: Arc<dyn ProcessingCapability>,
        status: Arc<dyn StatusStore>,
        storage: Arc<dyn ObjectStore>,
        notifier: OutcomeNotifier,
    ) -> Self {
        Self {
            stage: processor.stage(),
            processor,
            status,
            storage,
            notifier,
            input_bucket: config.input_bucket.clone(),
            output_bucket: config.output_bucket.clone(),
            work_dir: config.media.work_dir.clone(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run the stage on `message` and report the outcome.
    ///
    /// Returns the output object key. On failure the stage state is
    /// recorded as failed and, when no broker retry will follow, a failure
    /// outcome is reported before the error is returned. An unknown video
    /// is retried through the broker but never reported.
    pub async fn execute(&self, message: &StageMessage, attempt: Attempt) -> WorkerResult<String> {
        let logger = StageLogger::new(&message.video_id, self.stage);
        let span = logger.create_span(attempt.retry_count);
        self.execute_inner(message, attempt, &logger)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        message: &StageMessage,
        attempt: Attempt,
        logger: &StageLogger,
    ) -> WorkerResult<String> {
        let video_id = &message.video_id;
        let known = match self.status.find(video_id).await {
            Ok(video) => video.is_some(),
            Err(e) => return Err(self.fail(message, e.into(), attempt, logger).await),
        };
        if !known {
            // No record to fail; the broker retries and finally dead-letters
            logger.log_warning("video is not known to the status store");
            return Err(WorkerError::VideoNotFound(video_id.clone()));
        }

        logger.log_start(&message.filename);
        self.record_state(video_id, StageState::Running, logger).await;

        let started = Instant::now();
        let result = self.run_stage(message, logger).await;
        metrics::record_stage_run(
            self.stage.as_str(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        match result {
            Ok(key) => {
                self.record_state(video_id, StageState::Succeeded, logger).await;
                let event = StageOutcomeEvent::completed(
                    video_id.clone(),
                    message.filename.clone(),
                    self.stage,
                    key.clone(),
                )
                .with_dispatch(message.dispatch);
                if let Err(e) = self.notifier.notify(&event).await {
                    return Err(self.fail(message, e, attempt, logger).await);
                }
                logger.log_completion(&key);
                Ok(key)
            }
            Err(e) => Err(self.fail(message, e, attempt, logger).await),
        }
    }

    /// Download, process and upload. Returns the output key.
    async fn run_stage(&self, message: &StageMessage, logger: &StageLogger) -> WorkerResult<String> {
        validate_key(&message.filename)
            .map_err(|e| WorkerError::invalid_message(e.to_string()))?;

        let workspace = Workspace::create(
            &self.work_dir,
            &format!("{}-{}", message.video_id, self.stage),
        )
        .await?;
        let extension = extension_of(&message.filename);
        let input = workspace.file(&format!("input{}", extension));
        let output = workspace.file(&format!("output{}", extension));

        let bytes = self
            .storage
            .download_to(&self.input_bucket, &message.filename, &input)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    WorkerError::InputNotFound(format!("{}/{}", self.input_bucket, message.filename))
                } else {
                    WorkerError::DownloadFailed(e.to_string())
                }
            })?;
        logger.log_progress(&format!("downloaded {} bytes", bytes));

        self.processor
            .process(&input, &output)
            .await
            .map_err(|e| WorkerError::processing_failed(e.detail()))?;
        logger.log_progress("processing finished");

        let key = output_key(self.stage, &message.filename);
        self.storage
            .upload_from(&self.output_bucket, &key, &output, content_type_for(&key))
            .await
            .map_err(|e| WorkerError::UploadFailed(e.to_string()))?;

        Ok(key)
    }

    /// Record the failure and report it when this is the last attempt.
    async fn fail(
        &self,
        message: &StageMessage,
        err: WorkerError,
        attempt: Attempt,
        logger: &StageLogger,
    ) -> WorkerError {
        logger.log_error(&err.to_string());
        self.record_state(&message.video_id, StageState::Failed, logger).await;

        if attempt.is_final() || !err.is_retryable() {
            let event = StageOutcomeEvent::failed(
                message.video_id.clone(),
                message.filename.clone(),
                self.stage,
                err.to_string(),
            )
            .with_dispatch(message.dispatch);
            if let Err(e) = self.notifier.notify(&event).await {
                logger.log_error(&format!("failed to report failure: {}", e));
            }
        } else {
            logger.log_warning(&format!(
                "attempt {} of {} failed, leaving it to the broker",
                attempt.retry_count + 1,
                attempt.max_retries + 1
            ));
        }
        err
    }

    /// Best-effort advisory state write.
    async fn record_state(&self, video_id: &VideoId, state: StageState, logger: &StageLogger) {
        if let Err(e) = self.status.update_stage_state(video_id, self.stage, state).await {
            logger.log_warning(&format!("failed to record stage state {}: {}", state, e));
        }
    }
}

/// Extension of the key's basename including the dot, `.mp4` when absent.
fn extension_of(key: &str) -> String {
    Path::new(object_basename(key))
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| ".mp4".to_string())
}

fn content_type_for(key: &str) -> &'static str {
    match extension_of(key).as_str() {
        ".mp4" | ".m4v" => "video/mp4",
        ".mov" => "video/quicktime",
        ".webm" => "video/webm",
        ".mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_key_uses_stage_prefix() {
        assert_eq!(output_key(Stage::Trim, "raw/v-1.mp4"), "trimmed/v-1.mp4");
        assert_eq!(output_key(Stage::Edit, "trimmed/v-1.mp4"), "edited/v-1.mp4");
        assert_eq!(output_key(Stage::IntroOutro, "muted/v-1.mp4"), "processed/v-1.mp4");
        assert_eq!(output_key(Stage::Watermark, "v-1.mp4"), "watermarked/v-1.mp4");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("raw/v-1.MOV"), ".mov");
        assert_eq!(extension_of("raw/v-1"), ".mp4");
        assert_eq!(extension_of("raw.dir/v-1"), ".mp4");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("trimmed/v-1.mp4"), "video/mp4");
        assert_eq!(content_type_for("trimmed/v-1.webm"), "video/webm");
        assert_eq!(content_type_for("trimmed/v-1.avi"), "application/octet-stream");
    }
}

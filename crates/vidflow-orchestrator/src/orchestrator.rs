//! Pipeline orchestrator.
//!
//! Owns every change of [`VideoStatus`]. Each inbound event becomes one
//! lookup in the transition table and at most one publish plus one status
//! write. Work is published before the status moves: if the publish fails
//! the event is redelivered and nothing has changed, and if the status
//! write then fails the redelivered event publishes the same work again,
//! which stage workers tolerate.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use vidflow_models::{
    sanitize_for_log, QueueTopology, Stage, StageMessage, StageOutcomeEvent, Video, VideoId,
    VideoStatus,
};
use vidflow_queue::{metrics, Envelope, PublishOutcome, QueuePublisher};
use vidflow_status::StatusStore;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ledger::RetryLedger;
use crate::transitions::{decide, Action, DiscardReason, Trigger};

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Work for `stage` was published and the status moved `from` -> `to`
    Dispatched {
        stage: Stage,
        from: VideoStatus,
        to: VideoStatus,
    },
    /// The video reached `Processed`
    Completed { processed_object: String },
    /// `stage` will be re-dispatched after the retry delay
    RetryScheduled { stage: Stage, failures: u32 },
    /// `stage` used up its retries and the video is `Failed`
    Failed { stage: Stage, failures: u32 },
    /// No transition; the event was stale, duplicated or late
    Discarded(DiscardReason),
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Dispatched { .. } => "advanced",
            TransitionOutcome::Completed { .. } => "completed",
            TransitionOutcome::RetryScheduled { .. } => "retry",
            TransitionOutcome::Failed { .. } => "failed",
            TransitionOutcome::Discarded(_) => "discarded",
        }
    }
}

/// Drives videos through the pipeline.
pub struct Orchestrator {
    status: Arc<dyn StatusStore>,
    publisher: Arc<dyn QueuePublisher>,
    ledger: Arc<dyn RetryLedger>,
    topology: QueueTopology,
    stage_max_retries: u32,
    retry_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        status: Arc<dyn StatusStore>,
        publisher: Arc<dyn QueuePublisher>,
        ledger: Arc<dyn RetryLedger>,
    ) -> Self {
        Self {
            status,
            publisher,
            ledger,
            topology: config.topology.clone(),
            stage_max_retries: config.stage_max_retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Override the delay before a failed stage is re-dispatched.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Delay before a failed stage is re-dispatched, in whole minutes.
    pub fn retry_delay_minutes(&self) -> u64 {
        self.retry_delay.as_secs() / 60
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// Start the pipeline for an uploaded video: `Uploaded -> Trimming`.
    ///
    /// The trim input is `filename` when given, otherwise the video's source
    /// object. When `filename` is given and the store has no record yet, an
    /// `Uploaded` record is created first.
    pub async fn execute(
        &self,
        video_id: &VideoId,
        filename: Option<&str>,
    ) -> OrchestratorResult<TransitionOutcome> {
        let video = match (self.status.find(video_id).await?, filename) {
            (Some(video), _) => video,
            (None, Some(filename)) => {
                let video = Video::uploaded(video_id.clone(), filename);
                if self.status.insert(&video).await? {
                    info!(video_id = %sanitize_for_log(video_id.as_str()), "Registered upload");
                }
                self.require(video_id).await?
            }
            (None, None) => return Err(OrchestratorError::VideoNotFound(video_id.clone())),
        };

        let input = filename.unwrap_or(&video.source_object).to_string();
        self.apply(&video, Trigger::Upload, &input, 0).await
    }

    /// Route a stage outcome to its handler.
    pub async fn handle_outcome(
        &self,
        event: &StageOutcomeEvent,
    ) -> OrchestratorResult<TransitionOutcome> {
        let stage = event.resolved_stage().ok_or_else(|| {
            OrchestratorError::invalid_message(format!(
                "cannot tell which stage produced {}",
                sanitize_for_log(&event.filename)
            ))
        })?;

        if !event.is_success() {
            return self.handle_stage_failed(event, stage).await;
        }
        match stage {
            Stage::Trim => self.handle_trim_completed(event).await,
            Stage::Edit => self.handle_edit_completed(event).await,
            Stage::Watermark => self.handle_watermarking_completed(event).await,
            Stage::AudioRemoval => self.handle_audio_removal_completed(event).await,
            Stage::IntroOutro => self.handle_intro_outro_completed(event).await,
        }
    }

    /// `Trimming -> AdjustingResolution`, publishing the edit work.
    pub async fn handle_trim_completed(
        &self,
        event: &StageOutcomeEvent,
    ) -> OrchestratorResult<TransitionOutcome> {
        self.handle_completed(event, Stage::Trim).await
    }

    /// `AdjustingResolution -> AddingWatermark`, publishing the watermark work.
    pub async fn handle_edit_completed(
        &self,
        event: &StageOutcomeEvent,
    ) -> OrchestratorResult<TransitionOutcome> {
        self.handle_completed(event, Stage::Edit).await
    }

    /// `AddingWatermark -> RemovingAudio`, publishing the audio removal work.
    pub async fn handle_watermarking_completed(
        &self,
        event: &StageOutcomeEvent,
    ) -> OrchestratorResult<TransitionOutcome> {
        self.handle_completed(event, Stage::Watermark).await
    }

    /// `RemovingAudio -> AddingIntroOutro`, publishing the intro/outro work.
    pub async fn handle_audio_removal_completed(
        &self,
        event: &StageOutcomeEvent,
    ) -> OrchestratorResult<TransitionOutcome> {
        self.handle_completed(event, Stage::AudioRemoval).await
    }

    /// `AddingIntroOutro -> Processed`, recording the final object.
    pub async fn handle_intro_outro_completed(
        &self,
        event: &StageOutcomeEvent,
    ) -> OrchestratorResult<TransitionOutcome> {
        self.handle_completed(event, Stage::IntroOutro).await
    }

    /// Count a stage failure, then re-dispatch the stage later or give up.
    pub async fn handle_stage_failed(
        &self,
        event: &StageOutcomeEvent,
        stage: Stage,
    ) -> OrchestratorResult<TransitionOutcome> {
        let video = self.require(&event.video_id).await?;
        if let Some(reason) = &event.error {
            debug!(
                video_id = %sanitize_for_log(event.video_id.as_str()),
                stage = %stage,
                "Stage reported failure: {}",
                sanitize_for_log(reason)
            );
        }
        self.apply(&video, Trigger::Failed(stage), &event.filename, event.dispatch)
            .await
    }

    async fn handle_completed(
        &self,
        event: &StageOutcomeEvent,
        stage: Stage,
    ) -> OrchestratorResult<TransitionOutcome> {
        let output = event.bucket_path.as_deref().ok_or_else(|| {
            OrchestratorError::invalid_message(format!(
                "{} completion for {} has no bucket_path",
                stage,
                sanitize_for_log(event.video_id.as_str())
            ))
        })?;
        let video = self.require(&event.video_id).await?;
        let outcome = self
            .apply(&video, Trigger::Completed(stage), output, 0)
            .await?;

        if !matches!(outcome, TransitionOutcome::Discarded(_)) {
            if let Err(e) = self.ledger.reset(&video.id, stage).await {
                warn!(
                    video_id = %sanitize_for_log(video.id.as_str()),
                    stage = %stage,
                    "Failed to reset retry counter: {}",
                    e
                );
            }
        }
        Ok(outcome)
    }

    /// Look the trigger up in the table and carry out the action.
    ///
    /// `object` is the key the action works on: the next stage's input for
    /// a dispatch, the final output for completion, the failed stage's input
    /// for a retry. `dispatch` is the number echoed by a failure event.
    async fn apply(
        &self,
        video: &Video,
        trigger: Trigger,
        object: &str,
        dispatch: u32,
    ) -> OrchestratorResult<TransitionOutcome> {
        let current = video.status;
        let action = decide(current, trigger);
        let log_id = sanitize_for_log(video.id.as_str());

        let outcome = match action {
            Action::Discard(reason) => {
                info!(
                    video_id = %log_id,
                    status = %current,
                    "Discarding {} event ({})",
                    trigger,
                    reason.as_str()
                );
                TransitionOutcome::Discarded(reason)
            }
            Action::Dispatch { stage } => {
                let next = stage.running_status();
                self.dispatch(&video.id, stage, object).await?;
                if self
                    .status
                    .compare_and_set_status(&video.id, current, next)
                    .await?
                {
                    info!(video_id = %log_id, from = %current, to = %next, "Dispatched {}", stage);
                    metrics::record_transition(current.as_str(), next.as_str());
                    TransitionOutcome::Dispatched {
                        stage,
                        from: current,
                        to: next,
                    }
                } else {
                    // A concurrent delivery of the same event won the race
                    info!(video_id = %log_id, "Status moved on while dispatching {}", stage);
                    TransitionOutcome::Discarded(DiscardReason::StageMismatch)
                }
            }
            Action::Complete => {
                if self.status.complete(&video.id, current, object).await? {
                    info!(
                        video_id = %log_id,
                        processed_object = %sanitize_for_log(object),
                        "Video processed"
                    );
                    metrics::record_transition(current.as_str(), VideoStatus::Processed.as_str());
                    TransitionOutcome::Completed {
                        processed_object: object.to_string(),
                    }
                } else {
                    TransitionOutcome::Discarded(DiscardReason::StageMismatch)
                }
            }
            Action::RetryOrFail { stage } => {
                self.retry_or_fail(video, stage, object, dispatch).await?
            }
        };

        metrics::record_orchestrator_outcome(outcome.as_str());
        Ok(outcome)
    }

    /// Count the failure reported for dispatch number `dispatch`.
    ///
    /// A retry goes out as dispatch `failures`, so each dispatch answers with
    /// at most one counted failure. A failure event seen again after its
    /// retry went out is discarded; one whose count stands but whose video
    /// was not yet marked failed is marked again.
    async fn retry_or_fail(
        &self,
        video: &Video,
        stage: Stage,
        input: &str,
        dispatch: u32,
    ) -> OrchestratorResult<TransitionOutcome> {
        let log_id = sanitize_for_log(video.id.as_str());
        let record = self.ledger.record_failure(&video.id, stage, dispatch).await?;
        let failures = record.failures;

        if failures != dispatch.saturating_add(1) {
            info!(
                video_id = %log_id,
                stage = %stage,
                dispatch,
                failures,
                "Discarding failure from an earlier dispatch"
            );
            return Ok(TransitionOutcome::Discarded(DiscardReason::Duplicate));
        }

        if failures < self.stage_max_retries {
            if !record.counted {
                info!(video_id = %log_id, stage = %stage, dispatch, "Retry already scheduled");
                return Ok(TransitionOutcome::Discarded(DiscardReason::Duplicate));
            }

            let queue = self.topology.queue_for(stage);
            let message = StageMessage::new(video.id.clone(), input).with_dispatch(failures);
            let scheduled = match self.stage_envelope(&video.id, stage, &message) {
                Ok(envelope) => self
                    .publisher
                    .publish_delayed(queue, envelope, self.retry_delay)
                    .await
                    .map_err(OrchestratorError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = scheduled {
                // Let the redelivered event count this failure again
                if let Err(release_err) = self.ledger.release(&video.id, stage, failures).await {
                    warn!(
                        video_id = %log_id,
                        stage = %stage,
                        "Failed to release failure count: {}",
                        release_err
                    );
                }
                return Err(e);
            }

            warn!(
                video_id = %log_id,
                stage = %stage,
                "Stage failed ({}/{}), retrying in {} minutes",
                failures,
                self.stage_max_retries,
                self.retry_delay_minutes()
            );
            metrics::record_stage_retry_scheduled(stage.as_str());
            return Ok(TransitionOutcome::RetryScheduled { stage, failures });
        }

        if self
            .status
            .compare_and_set_status(&video.id, video.status, VideoStatus::Failed)
            .await?
        {
            warn!(
                video_id = %log_id,
                stage = %stage,
                "Stage failed {} times, marking video failed",
                failures
            );
            metrics::record_transition(video.status.as_str(), VideoStatus::Failed.as_str());
            Ok(TransitionOutcome::Failed { stage, failures })
        } else {
            Ok(TransitionOutcome::Discarded(DiscardReason::StageMismatch))
        }
    }

    /// Publish the work message for `stage`.
    async fn dispatch(&self, video_id: &VideoId, stage: Stage, input: &str) -> OrchestratorResult<()> {
        let queue = self.topology.queue_for(stage);
        let message = StageMessage::new(video_id.clone(), input);
        let envelope = self.stage_envelope(video_id, stage, &message)?;
        match self.publisher.publish(queue, envelope).await? {
            PublishOutcome::Queued => Ok(()),
            other => Err(OrchestratorError::dispatch_failed(
                video_id,
                stage,
                format!("{} {}", queue, other.as_str()),
            )),
        }
    }

    fn stage_envelope(
        &self,
        video_id: &VideoId,
        stage: Stage,
        message: &StageMessage,
    ) -> OrchestratorResult<Envelope> {
        Envelope::json(message).map_err(|e| {
            OrchestratorError::dispatch_failed(video_id, stage, format!("encode failed: {}", e))
        })
    }

    async fn require(&self, video_id: &VideoId) -> OrchestratorResult<Video> {
        self.status
            .find(video_id)
            .await?
            .ok_or_else(|| OrchestratorError::VideoNotFound(video_id.clone()))
    }
}

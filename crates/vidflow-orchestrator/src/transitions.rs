//! The pipeline's transition table.
//!
//! Every decision the orchestrator makes is a lookup of
//! `(current status, trigger)` in [`TRANSITIONS`]. Anything not listed is
//! discarded: terminal videos accept nothing, and an event for a stage
//! other than the one the video is in is stale or duplicated.

use std::fmt;

use vidflow_models::{Stage, VideoStatus};

/// What happened to a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Upload finished; start the pipeline
    Upload,
    /// A stage reported success
    Completed(Stage),
    /// A stage reported failure
    Failed(Stage),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Upload => write!(f, "upload"),
            Trigger::Completed(stage) => write!(f, "{} completed", stage),
            Trigger::Failed(stage) => write!(f, "{} failed", stage),
        }
    }
}

/// Why an event leads to no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The video is `Processed` or `Failed`
    Terminal,
    /// The event does not match the stage the video is in
    StageMismatch,
    /// The failure was already counted for this dispatch
    Duplicate,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Terminal => "terminal",
            DiscardReason::StageMismatch => "stage_mismatch",
            DiscardReason::Duplicate => "duplicate",
        }
    }
}

/// What the orchestrator does in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Publish work for `stage` and move to its running status
    Dispatch { stage: Stage },
    /// Record the final output and move to `Processed`
    Complete,
    /// Count the failure; re-dispatch `stage` later or move to `Failed`
    RetryOrFail { stage: Stage },
    Discard(DiscardReason),
}

/// One row of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: VideoStatus,
    pub on: Trigger,
    pub action: Action,
}

const fn row(from: VideoStatus, on: Trigger, action: Action) -> Transition {
    Transition { from, on, action }
}

/// Every transition the pipeline allows.
pub const TRANSITIONS: [Transition; 11] = [
    row(VideoStatus::Uploaded, Trigger::Upload, Action::Dispatch { stage: Stage::Trim }),
    // handle_trim_completed
    row(
        VideoStatus::Trimming,
        Trigger::Completed(Stage::Trim),
        Action::Dispatch { stage: Stage::Edit },
    ),
    // handle_edit_completed
    row(
        VideoStatus::AdjustingResolution,
        Trigger::Completed(Stage::Edit),
        Action::Dispatch { stage: Stage::Watermark },
    ),
    // handle_watermarking_completed
    row(
        VideoStatus::AddingWatermark,
        Trigger::Completed(Stage::Watermark),
        Action::Dispatch { stage: Stage::AudioRemoval },
    ),
    // handle_audio_removal_completed
    row(
        VideoStatus::RemovingAudio,
        Trigger::Completed(Stage::AudioRemoval),
        Action::Dispatch { stage: Stage::IntroOutro },
    ),
    // handle_intro_outro_completed
    row(
        VideoStatus::AddingIntroOutro,
        Trigger::Completed(Stage::IntroOutro),
        Action::Complete,
    ),
    row(
        VideoStatus::Trimming,
        Trigger::Failed(Stage::Trim),
        Action::RetryOrFail { stage: Stage::Trim },
    ),
    row(
        VideoStatus::AdjustingResolution,
        Trigger::Failed(Stage::Edit),
        Action::RetryOrFail { stage: Stage::Edit },
    ),
    row(
        VideoStatus::AddingWatermark,
        Trigger::Failed(Stage::Watermark),
        Action::RetryOrFail { stage: Stage::Watermark },
    ),
    row(
        VideoStatus::RemovingAudio,
        Trigger::Failed(Stage::AudioRemoval),
        Action::RetryOrFail { stage: Stage::AudioRemoval },
    ),
    row(
        VideoStatus::AddingIntroOutro,
        Trigger::Failed(Stage::IntroOutro),
        Action::RetryOrFail { stage: Stage::IntroOutro },
    ),
];

/// Look up the action for `trigger` while the video is in `current`.
pub fn decide(current: VideoStatus, trigger: Trigger) -> Action {
    if current.is_terminal() {
        return Action::Discard(DiscardReason::Terminal);
    }
    TRANSITIONS
        .iter()
        .find(|t| t.from == current && t.on == trigger)
        .map(|t| t.action)
        .unwrap_or(Action::Discard(DiscardReason::StageMismatch))
}

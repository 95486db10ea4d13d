//! Pipeline stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::video::VideoStatus;

/// One transformation step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Cut the video down to the maximum allowed duration
    Trim,
    /// Normalise resolution (scale + pad)
    Edit,
    /// Overlay the watermark logo
    Watermark,
    /// Strip the audio track
    AudioRemoval,
    /// Inject intro and outro curtains
    IntroOutro,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Trim,
        Stage::Edit,
        Stage::Watermark,
        Stage::AudioRemoval,
        Stage::IntroOutro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Trim => "trim",
            Stage::Edit => "edit",
            Stage::Watermark => "watermark",
            Stage::AudioRemoval => "audio-removal",
            Stage::IntroOutro => "intro-outro",
        }
    }

    /// Status a video holds while this stage is running.
    pub fn running_status(&self) -> VideoStatus {
        match self {
            Stage::Trim => VideoStatus::Trimming,
            Stage::Edit => VideoStatus::AdjustingResolution,
            Stage::Watermark => VideoStatus::AddingWatermark,
            Stage::AudioRemoval => VideoStatus::RemovingAudio,
            Stage::IntroOutro => VideoStatus::AddingIntroOutro,
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Trim => Some(Stage::Edit),
            Stage::Edit => Some(Stage::Watermark),
            Stage::Watermark => Some(Stage::AudioRemoval),
            Stage::AudioRemoval => Some(Stage::IntroOutro),
            Stage::IntroOutro => None,
        }
    }

    /// Default name of the queue feeding this stage.
    pub fn default_queue(&self) -> &'static str {
        match self {
            Stage::Trim => "trim.queue",
            Stage::Edit => "edit.queue",
            Stage::Watermark => "watermark.queue",
            Stage::AudioRemoval => "audio-removal.queue",
            Stage::IntroOutro => "intro-outro.queue",
        }
    }

    /// Key prefix under which this stage stores its output.
    pub fn output_prefix(&self) -> &'static str {
        match self {
            Stage::Trim => "trimmed",
            Stage::Edit => "edited",
            Stage::Watermark => "watermarked",
            Stage::AudioRemoval => "muted",
            Stage::IntroOutro => "processed",
        }
    }

    /// Guess the stage that produced an object from its key.
    ///
    /// Used for outcome events that predate the explicit `stage` field.
    pub fn infer_from_object(key: &str) -> Option<Stage> {
        let key = key.to_ascii_lowercase();
        if key.contains("trim") {
            Some(Stage::Trim)
        } else if key.contains("edit") {
            Some(Stage::Edit)
        } else if key.contains("watermark") {
            Some(Stage::Watermark)
        } else if key.contains("audio") || key.contains("muted") {
            Some(Stage::AudioRemoval)
        } else if key.contains("processed") || key.contains("intro") || key.contains("outro") {
            Some(Stage::IntroOutro)
        } else {
            None
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a stage name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "trim" => Ok(Stage::Trim),
            "edit" | "resolution" => Ok(Stage::Edit),
            "watermark" | "watermarking" => Ok(Stage::Watermark),
            "audio-removal" | "audio" => Ok(Stage::AudioRemoval),
            "intro-outro" | "curtains" => Ok(Stage::IntroOutro),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

/// Advisory state a worker reports for the stage it is running.
///
/// Never used to make pipeline decisions; the orchestrator relies on
/// [`VideoStatus`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::Failed => "failed",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageState {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(StageState::Running),
            "succeeded" => Ok(StageState::Succeeded),
            "failed" => Ok(StageState::Failed),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

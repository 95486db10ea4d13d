//! Video records and pipeline status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::stage::{Stage, StageState};

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pipeline status of a video.
///
/// Variants are declared in pipeline order. `Processed` and `Failed` are
/// absorbing: nothing moves a video out of them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    /// Upload finished, pipeline not started
    #[default]
    Uploaded,
    /// Trim stage in progress
    Trimming,
    /// Resolution/edit stage in progress
    AdjustingResolution,
    /// Watermark stage in progress
    AddingWatermark,
    /// Audio removal stage in progress
    RemovingAudio,
    /// Intro/outro stage in progress
    AddingIntroOutro,
    /// Every stage completed
    Processed,
    /// A stage gave up
    Failed,
}

impl VideoStatus {
    /// All statuses in pipeline order.
    pub const ALL: [VideoStatus; 8] = [
        VideoStatus::Uploaded,
        VideoStatus::Trimming,
        VideoStatus::AdjustingResolution,
        VideoStatus::AddingWatermark,
        VideoStatus::RemovingAudio,
        VideoStatus::AddingIntroOutro,
        VideoStatus::Processed,
        VideoStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "UPLOADED",
            VideoStatus::Trimming => "TRIMMING",
            VideoStatus::AdjustingResolution => "ADJUSTING_RESOLUTION",
            VideoStatus::AddingWatermark => "ADDING_WATERMARK",
            VideoStatus::RemovingAudio => "REMOVING_AUDIO",
            VideoStatus::AddingIntroOutro => "ADDING_INTRO_OUTRO",
            VideoStatus::Processed => "PROCESSED",
            VideoStatus::Failed => "FAILED",
        }
    }

    /// Position along the pipeline. `None` for `Failed`, which sits outside
    /// the ordering.
    pub fn position(&self) -> Option<u8> {
        match self {
            VideoStatus::Uploaded => Some(0),
            VideoStatus::Trimming => Some(1),
            VideoStatus::AdjustingResolution => Some(2),
            VideoStatus::AddingWatermark => Some(3),
            VideoStatus::RemovingAudio => Some(4),
            VideoStatus::AddingIntroOutro => Some(5),
            VideoStatus::Processed => Some(6),
            VideoStatus::Failed => None,
        }
    }

    /// Check if this is a terminal state (no more events accepted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Processed | VideoStatus::Failed)
    }

    /// The stage that is running while the video sits in this status.
    pub fn active_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.running_status() == *self)
    }

    /// Whether moving from `self` to `next` respects forward-only progress.
    ///
    /// `Failed` is reachable from every non-terminal status; otherwise the
    /// target must be strictly later in the pipeline.
    pub fn can_advance_to(&self, next: VideoStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.position(), next.position()) {
            (_, None) => true,
            (Some(current), Some(target)) => target > current,
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown video status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for VideoStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VideoStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A video as recorded by the status store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Unique video ID
    pub id: VideoId,

    /// Object key of the original upload
    pub source_object: String,

    /// Pipeline status, written by the orchestrator only
    #[serde(default)]
    pub status: VideoStatus,

    /// Object key of the final output, set once processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_object: Option<String>,

    /// Stage a worker last reported on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<Stage>,

    /// Advisory state reported by that worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_state: Option<StageState>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// When the video reached `Processed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Video {
    /// Create a freshly uploaded video.
    pub fn uploaded(id: impl Into<VideoId>, source_object: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_object: source_object.into(),
            status: VideoStatus::Uploaded,
            processed_object: None,
            last_stage: None,
            stage_state: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Check if the video is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

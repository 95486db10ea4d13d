//! Messages carried on the pipeline queues.
//!
//! Wire shapes:
//! - stage work / upload: `{"video_id":"v-1","filename":"raw/v-1.mp4"}`
//! - outcome: `{"video_id":"v-1","filename":"raw/v-1.mp4","stage":"trim",
//!   "bucket_path":"trimmed/v-1.mp4","status":"completed"}`
//!
//! Stage work re-dispatched after a failure also carries `"dispatch":N`,
//! which the worker echoes back in its outcome. It is omitted when zero.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stage::Stage;
use crate::video::VideoId;

/// Work item on a stage queue.
///
/// Redelivering the same message is safe: the worker re-downloads,
/// re-processes and overwrites the same destination key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageMessage {
    pub video_id: VideoId,
    /// Object key the stage reads its input from
    pub filename: String,
    /// Stage failures already handled for this video when this was sent
    #[serde(default, skip_serializing_if = "is_zero")]
    pub dispatch: u32,
}

impl StageMessage {
    pub fn new(video_id: impl Into<VideoId>, filename: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            filename: filename.into(),
            dispatch: 0,
        }
    }

    pub fn with_dispatch(mut self, dispatch: u32) -> Self {
        self.dispatch = dispatch;
        self
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Result reported by a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Completed => write!(f, "completed"),
            OutcomeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Event a worker sends to the orchestrator after attempting a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageOutcomeEvent {
    pub video_id: VideoId,
    /// Object key the stage was given as input
    pub filename: String,
    /// Stage that produced this event; older producers omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub status: OutcomeStatus,
    /// Object key of the stage output (success only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_path: Option<String>,
    /// Failure detail (failure only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch number of the stage message this event answers
    #[serde(default, skip_serializing_if = "is_zero")]
    pub dispatch: u32,
}

impl StageOutcomeEvent {
    /// Successful stage attempt.
    pub fn completed(
        video_id: impl Into<VideoId>,
        filename: impl Into<String>,
        stage: Stage,
        bucket_path: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            filename: filename.into(),
            stage: Some(stage),
            status: OutcomeStatus::Completed,
            bucket_path: Some(bucket_path.into()),
            error: None,
            dispatch: 0,
        }
    }

    /// Failed stage attempt.
    pub fn failed(
        video_id: impl Into<VideoId>,
        filename: impl Into<String>,
        stage: Stage,
        error: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            filename: filename.into(),
            stage: Some(stage),
            status: OutcomeStatus::Failed,
            bucket_path: None,
            error: Some(error.into()),
            dispatch: 0,
        }
    }

    /// Answer the stage message with this dispatch number.
    pub fn with_dispatch(mut self, dispatch: u32) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    /// The stage this event reports on, inferring it from object keys when
    /// the producer did not name it.
    ///
    /// A success names its output key, which carries the stage's own prefix.
    /// A failure only names its input key, which was produced by the stage
    /// before it; an unprefixed input is a raw upload, so the stage is Trim.
    pub fn resolved_stage(&self) -> Option<Stage> {
        if self.stage.is_some() {
            return self.stage;
        }
        match self.status {
            OutcomeStatus::Completed => self
                .bucket_path
                .as_deref()
                .and_then(Stage::infer_from_object),
            OutcomeStatus::Failed => match Stage::infer_from_object(&self.filename) {
                Some(previous) => previous.next(),
                None => Some(Stage::Trim),
            },
        }
    }
}

/// Notice that an upload finished and the pipeline may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UploadNotice {
    #[serde(alias = "videoId")]
    pub video_id: VideoId,
    /// Source object key; the stored record is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Anything the orchestrator's inbound queue may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Outcome(StageOutcomeEvent),
    Upload(UploadNotice),
}

impl InboundMessage {
    /// Parse a raw queue payload.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            InboundMessage::Outcome(event) => &event.video_id,
            InboundMessage::Upload(notice) => &notice.video_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_message_wire_shape() {
        let msg = StageMessage::new("v-1", "raw/v-1.mp4");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"video_id": "v-1", "filename": "raw/v-1.mp4"})
        );
    }

    #[test]
    fn test_dispatch_round_trips_and_defaults() {
        let msg = StageMessage::new("v-1", "edited/v-1.mp4").with_dispatch(2);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["dispatch"], 2);

        let legacy: StageMessage =
            serde_json::from_str(r#"{"video_id":"v-1","filename":"edited/v-1.mp4"}"#).unwrap();
        assert_eq!(legacy.dispatch, 0);

        let event = StageOutcomeEvent::failed("v-1", "edited/v-1.mp4", Stage::Watermark, "boom")
            .with_dispatch(2);
        match InboundMessage::from_slice(&serde_json::to_vec(&event).unwrap()).unwrap() {
            InboundMessage::Outcome(parsed) => assert_eq!(parsed.dispatch, 2),
            other => panic!("expected outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_completed_event_omits_error() {
        let event = StageOutcomeEvent::completed("v-1", "raw/v-1.mp4", Stage::Trim, "trimmed/v-1.mp4");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["bucket_path"], "trimmed/v-1.mp4");
        assert_eq!(json["stage"], "trim");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_event_omits_bucket_path() {
        let event = StageOutcomeEvent::failed("v-1", "raw/v-1.mp4", Stage::Watermark, "codec error");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "codec error");
        assert!(json.get("bucket_path").is_none());
    }

    #[test]
    fn test_inbound_parses_upload_notice() {
        let msg = InboundMessage::from_slice(br#"{"video_id":"v-1","filename":"raw/v-1.mp4"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Upload(UploadNotice {
                video_id: VideoId::from("v-1"),
                filename: Some("raw/v-1.mp4".to_string()),
            })
        );
    }

    #[test]
    fn test_inbound_parses_legacy_outcome_without_stage() {
        let body = br#"{"video_id":"v-1","filename":"raw/v-1.mp4","bucket_path":"processed/v-1.mp4","status":"completed"}"#;
        let msg = InboundMessage::from_slice(body).unwrap();
        match msg {
            InboundMessage::Outcome(event) => {
                assert!(event.stage.is_none());
                assert!(event.is_success());
                assert_eq!(event.resolved_stage(), Some(Stage::IntroOutro));
            }
            other => panic!("expected outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_accepts_error_status_alias() {
        let body = br#"{"video_id":"v-2","filename":"edited/v-2.mp4","status":"error","error":"boom"}"#;
        match InboundMessage::from_slice(body).unwrap() {
            InboundMessage::Outcome(event) => {
                assert_eq!(event.status, OutcomeStatus::Failed);
                assert_eq!(event.resolved_stage(), Some(Stage::Watermark));
            }
            other => panic!("expected outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_rejects_garbage() {
        assert!(InboundMessage::from_slice(b"not json").is_err());
        assert!(InboundMessage::from_slice(br#"{"filename":"x"}"#).is_err());
    }
}

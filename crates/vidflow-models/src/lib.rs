//! Shared data models for the vidflow pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Videos and their pipeline status
//! - Pipeline stages and their ordering
//! - Stage work messages and stage outcome events
//! - Queue topology (which queue feeds which stage)

pub mod message;
pub mod stage;
pub mod topology;
pub mod utils;
pub mod video;

// Re-export common types
pub use message::{InboundMessage, OutcomeStatus, StageMessage, StageOutcomeEvent, UploadNotice};
pub use stage::{Stage, StageState};
pub use topology::QueueTopology;
pub use utils::{object_basename, sanitize_for_log};
pub use video::{Video, VideoId, VideoStatus};

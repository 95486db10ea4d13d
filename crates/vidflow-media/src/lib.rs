//! Media processing for pipeline stages.
//!
//! Each stage's transformation is a [`ProcessingCapability`]: it reads one
//! local file and writes another. The implementations shell out to FFmpeg.
//!
//! - [`command`]: FFmpeg command builder and runner
//! - [`probe`]: FFprobe stream information
//! - [`processors`]: one capability per stage
//! - [`workspace`]: per-attempt scratch directories

pub mod command;
pub mod config;
pub mod error;
pub mod probe;
pub mod processors;
pub mod workspace;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use config::MediaConfig;
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use processors::{
    processor_for, AudioRemover, IntroOutroInjector, ProcessingCapability, ResolutionAdjuster,
    Trimmer, WatermarkOverlay,
};
pub use workspace::Workspace;

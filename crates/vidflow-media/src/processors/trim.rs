//! Trim stage: keep the head of the video.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use vidflow_models::Stage;

use super::ProcessingCapability;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::MediaConfig;
use crate::error::MediaResult;

/// Cuts a video down to at most `max_seconds` without re-encoding.
#[derive(Debug, Clone)]
pub struct Trimmer {
    max_seconds: f64,
    runner: FfmpegRunner,
}

impl Trimmer {
    pub fn new(max_seconds: f64) -> Self {
        Self {
            max_seconds,
            runner: FfmpegRunner::new(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            max_seconds: config.trim_max_seconds,
            runner: FfmpegRunner::new().with_timeout(config.ffmpeg_timeout_secs),
        }
    }

    pub fn build_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(output)
            .input(input)
            .duration(self.max_seconds)
            .stream_copy()
    }
}

#[async_trait]
impl ProcessingCapability for Trimmer {
    fn stage(&self) -> Stage {
        Stage::Trim
    }

    async fn process(&self, input: &Path, output: &Path) -> MediaResult<()> {
        debug!(max_seconds = self.max_seconds, "Trimming video");
        self.runner.run(&self.build_command(input, output)).await
    }
}

//! Audio removal stage.

use async_trait::async_trait;
use std::path::Path;

use vidflow_models::Stage;

use super::ProcessingCapability;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::MediaConfig;
use crate::error::MediaResult;

/// Drops every audio stream and copies the video untouched.
#[derive(Debug, Clone, Default)]
pub struct AudioRemover {
    runner: FfmpegRunner,
}

impl AudioRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(config.ffmpeg_timeout_secs),
        }
    }

    pub fn build_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(output)
            .input(input)
            .output_arg("-an")
            .video_codec("copy")
    }
}

#[async_trait]
impl ProcessingCapability for AudioRemover {
    fn stage(&self) -> Stage {
        Stage::AudioRemoval
    }

    async fn process(&self, input: &Path, output: &Path) -> MediaResult<()> {
        self.runner.run(&self.build_command(input, output)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_audio_and_copies_video() {
        let args = AudioRemover::new()
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"))
            .build_args();
        assert_eq!(
            args,
            vec!["-y", "-v", "error", "-i", "in.mp4", "-an", "-c:v", "copy", "out.mp4"]
        );
    }
}

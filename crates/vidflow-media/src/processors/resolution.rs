//! Edit stage: normalise resolution.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use vidflow_models::Stage;

use super::ProcessingCapability;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::MediaConfig;
use crate::error::MediaResult;

/// Scales a video to fit `width`x`height` and letterboxes the rest.
#[derive(Debug, Clone)]
pub struct ResolutionAdjuster {
    width: u32,
    height: u32,
    runner: FfmpegRunner,
}

impl ResolutionAdjuster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            runner: FfmpegRunner::new(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            width: config.target_width,
            height: config.target_height,
            runner: FfmpegRunner::new().with_timeout(config.ffmpeg_timeout_secs),
        }
    }

    /// Scale preserving aspect ratio, then pad to the exact frame size.
    pub fn filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1"
        )
    }

    pub fn build_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(output)
            .input(input)
            .video_filter(self.filter())
            .h264_aac(20)
    }
}

#[async_trait]
impl ProcessingCapability for ResolutionAdjuster {
    fn stage(&self) -> Stage {
        Stage::Edit
    }

    async fn process(&self, input: &Path, output: &Path) -> MediaResult<()> {
        debug!(width = self.width, height = self.height, "Adjusting resolution");
        self.runner.run(&self.build_command(input, output)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scales_and_pads() {
        let adjuster = ResolutionAdjuster::new(1280, 720);
        assert_eq!(
            adjuster.filter(),
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2,setsar=1"
        );
    }

    #[test]
    fn test_reencodes_with_h264() {
        let args = ResolutionAdjuster::new(640, 360)
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"))
            .build_args()
            .join(" ");
        assert!(args.contains("-vf scale=640:360"));
        assert!(args.contains("-c:v libx264 -preset veryfast -crf 20"));
        assert!(args.ends_with("out.mp4"));
    }
}

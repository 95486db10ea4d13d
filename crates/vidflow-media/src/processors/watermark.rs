//! Watermark stage: overlay a logo in the bottom-right corner.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use vidflow_models::Stage;

use super::ProcessingCapability;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};

/// Overlays a PNG scaled to `width` pixels, `margin` pixels from the
/// bottom-right corner. Audio is carried over when present.
#[derive(Debug, Clone)]
pub struct WatermarkOverlay {
    image_path: PathBuf,
    width: u32,
    margin: u32,
    runner: FfmpegRunner,
}

impl WatermarkOverlay {
    pub fn new(image_path: impl Into<PathBuf>, width: u32, margin: u32) -> Self {
        Self {
            image_path: image_path.into(),
            width,
            margin,
            runner: FfmpegRunner::new(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            image_path: config.watermark_path.clone(),
            width: config.watermark_width,
            margin: config.watermark_margin,
            runner: FfmpegRunner::new().with_timeout(config.ffmpeg_timeout_secs),
        }
    }

    pub fn filter(&self) -> String {
        format!(
            "[1]scale={}:-1[wm];[0:v][wm]overlay=W-w-{m}:H-h-{m}[out]",
            self.width,
            m = self.margin
        )
    }

    pub fn build_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(output)
            .input(input)
            .input(&self.image_path)
            .filter_complex(self.filter())
            .map("[out]")
            .map("0:a?")
            .h264_aac(20)
            .output_arg("-shortest")
    }
}

#[async_trait]
impl ProcessingCapability for WatermarkOverlay {
    fn stage(&self) -> Stage {
        Stage::Watermark
    }

    async fn process(&self, input: &Path, output: &Path) -> MediaResult<()> {
        if !self.image_path.exists() {
            return Err(MediaError::FileNotFound(self.image_path.clone()));
        }
        debug!(image = %self.image_path.display(), "Applying watermark");
        self.runner.run(&self.build_command(input, output)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_filter_uses_margin() {
        let overlay = WatermarkOverlay::new("wm.png", 180, 24);
        assert_eq!(
            overlay.filter(),
            "[1]scale=180:-1[wm];[0:v][wm]overlay=W-w-24:H-h-24[out]"
        );
    }

    #[test]
    fn test_keeps_optional_audio() {
        let args = WatermarkOverlay::new("wm.png", 180, 24)
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"))
            .build_args()
            .join(" ");
        assert!(args.contains("-i in.mp4 -i wm.png"));
        assert!(args.contains("-map [out] -map 0:a?"));
        assert!(args.contains("-shortest"));
    }

    #[tokio::test]
    async fn test_missing_image_is_reported() {
        let overlay = WatermarkOverlay::new("/nonexistent/wm.png", 180, 24);
        let err = overlay
            .process(Path::new("in.mp4"), Path::new("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}

//! Media processing configuration.

use std::path::PathBuf;

use crate::error::{MediaError, MediaResult};

/// Parameters for every stage's processing capability.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory for per-attempt workspaces
    pub work_dir: PathBuf,
    /// Longest output the trim stage keeps
    pub trim_max_seconds: f64,
    /// Output width for the edit stage
    pub target_width: u32,
    /// Output height for the edit stage
    pub target_height: u32,
    /// Frame rate assumed for generated curtains when probing fails
    pub target_fps: u32,
    /// PNG overlaid by the watermark stage
    pub watermark_path: PathBuf,
    /// Width the watermark is scaled to, in pixels
    pub watermark_width: u32,
    /// Distance from the bottom-right corner, in pixels
    pub watermark_margin: u32,
    pub intro_seconds: f64,
    pub outro_seconds: f64,
    /// Logo shown centred on the intro and outro curtains
    pub curtain_logo_path: PathBuf,
    /// Kill FFmpeg after this many seconds
    pub ffmpeg_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vidflow"),
            trim_max_seconds: 30.0,
            target_width: 1280,
            target_height: 720,
            target_fps: 30,
            watermark_path: PathBuf::from("assets/watermark.png"),
            watermark_width: 180,
            watermark_margin: 24,
            intro_seconds: 2.5,
            outro_seconds: 2.5,
            curtain_logo_path: PathBuf::from("assets/logo.png"),
            ffmpeg_timeout_secs: 1800, // 30 minutes
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            trim_max_seconds: env_parse("TRIM_MAX_SECONDS").unwrap_or(defaults.trim_max_seconds),
            target_width: env_parse("TARGET_WIDTH").unwrap_or(defaults.target_width),
            target_height: env_parse("TARGET_HEIGHT").unwrap_or(defaults.target_height),
            target_fps: env_parse("TARGET_FPS").unwrap_or(defaults.target_fps),
            watermark_path: std::env::var("WATERMARK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.watermark_path),
            watermark_width: env_parse("WATERMARK_WIDTH").unwrap_or(defaults.watermark_width),
            watermark_margin: env_parse("WATERMARK_MARGIN").unwrap_or(defaults.watermark_margin),
            intro_seconds: env_parse("INTRO_SECONDS").unwrap_or(defaults.intro_seconds),
            outro_seconds: env_parse("OUTRO_SECONDS").unwrap_or(defaults.outro_seconds),
            curtain_logo_path: std::env::var("CURTAIN_LOGO_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.curtain_logo_path),
            ffmpeg_timeout_secs: env_parse("FFMPEG_TIMEOUT_SECS")
                .unwrap_or(defaults.ffmpeg_timeout_secs),
        }
    }

    pub fn validate(&self) -> MediaResult<()> {
        if !(self.trim_max_seconds > 0.0) {
            return Err(MediaError::config("TRIM_MAX_SECONDS must be positive"));
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err(MediaError::config("target resolution must be non-zero"));
        }
        // libx264 with yuv420p needs even dimensions
        if self.target_width % 2 != 0 || self.target_height % 2 != 0 {
            return Err(MediaError::config(format!(
                "target resolution {}x{} must be even",
                self.target_width, self.target_height
            )));
        }
        if self.target_fps == 0 {
            return Err(MediaError::config("TARGET_FPS must be positive"));
        }
        if self.intro_seconds < 0.0 || self.outro_seconds < 0.0 {
            return Err(MediaError::config("curtain durations must not be negative"));
        }
        if self.ffmpeg_timeout_secs == 0 {
            return Err(MediaError::config("FFMPEG_TIMEOUT_SECS must be positive"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

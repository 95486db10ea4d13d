//! Intro/outro stage: wrap the video in branded curtains.
//!
//! A curtain is the logo centred on a black frame matching the input's
//! size and frame rate, fading in and out. The intro curtain, the video and
//! the outro curtain are joined with the concat demuxer. Stream copy is
//! tried first; when the codecs do not line up the join is re-encoded.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use vidflow_models::Stage;

use super::ProcessingCapability;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Longest combined intro and outro, in seconds.
pub const MAX_CURTAIN_TOTAL_SECS: f64 = 5.0;

/// Logo width as a share of the frame width.
const LOGO_WIDTH_RATIO: f64 = 0.35;

#[derive(Debug, Clone)]
pub struct IntroOutroInjector {
    logo_path: PathBuf,
    intro_seconds: f64,
    outro_seconds: f64,
    runner: FfmpegRunner,
}

impl IntroOutroInjector {
    pub fn new(logo_path: impl Into<PathBuf>, intro_seconds: f64, outro_seconds: f64) -> Self {
        Self {
            logo_path: logo_path.into(),
            intro_seconds,
            outro_seconds,
            runner: FfmpegRunner::new(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            logo_path: config.curtain_logo_path.clone(),
            intro_seconds: config.intro_seconds,
            outro_seconds: config.outro_seconds,
            runner: FfmpegRunner::new().with_timeout(config.ffmpeg_timeout_secs),
        }
    }

    /// Intro and outro lengths, scaled down together when they exceed
    /// [`MAX_CURTAIN_TOTAL_SECS`].
    pub fn curtain_durations(&self) -> (f64, f64) {
        let intro = self.intro_seconds.max(0.0);
        let outro = self.outro_seconds.max(0.0);
        let total = intro + outro;
        if total > MAX_CURTAIN_TOTAL_SECS {
            let scale = MAX_CURTAIN_TOTAL_SECS / total;
            (intro * scale, outro * scale)
        } else {
            (intro, outro)
        }
    }

    /// Render one curtain of `seconds` matching `info`.
    ///
    /// Silent stereo audio is added only when the video has audio, so the
    /// parts agree on their stream layout.
    pub fn curtain_command(&self, info: &VideoInfo, seconds: f64, output: &Path) -> FfmpegCommand {
        let still = format!("{:.3}", seconds);
        let mut cmd = FfmpegCommand::new(output).input_with(
            ["-loop", "1", "-t", still.as_str()],
            self.logo_path.to_string_lossy(),
        );

        let background = if info.has_audio {
            cmd = cmd.lavfi("anullsrc=r=48000:cl=stereo", seconds);
            2
        } else {
            1
        };
        cmd = cmd.lavfi(
            format!("color=c=black:s={}x{}:r={}", info.width, info.height, info.fps),
            seconds,
        );

        cmd = cmd
            .filter_complex(curtain_filter(info.width, seconds, background))
            .map("[v]");
        if info.has_audio {
            cmd = cmd.map("1:a");
        }

        cmd.video_codec("libx264")
            .preset("veryfast")
            .crf(20)
            .audio_codec("aac")
            .audio_bitrate("128k")
            .output_arg("-r")
            .output_arg(info.fps.to_string())
            .output_arg("-pix_fmt")
            .output_arg("yuv420p")
            .faststart()
    }

    /// Join `parts` with the concat demuxer listed in `list`.
    pub fn concat_command(&self, list: &Path, output: &Path, reencode: bool) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(output).input_with(
            ["-f", "concat", "-safe", "0"],
            list.to_string_lossy(),
        );
        if reencode {
            cmd.h264_aac(23)
        } else {
            cmd.stream_copy()
        }
    }

    async fn render_curtain(
        &self,
        info: &VideoInfo,
        seconds: f64,
        output: &Path,
    ) -> MediaResult<Option<PathBuf>> {
        if seconds <= 0.0 {
            return Ok(None);
        }
        self.runner
            .run(&self.curtain_command(info, seconds, output))
            .await?;
        Ok(Some(output.to_path_buf()))
    }
}

#[async_trait]
impl ProcessingCapability for IntroOutroInjector {
    fn stage(&self) -> Stage {
        Stage::IntroOutro
    }

    async fn process(&self, input: &Path, output: &Path) -> MediaResult<()> {
        if !self.logo_path.exists() {
            return Err(MediaError::FileNotFound(self.logo_path.clone()));
        }

        let info = probe_video(input).await?;
        let (intro, outro) = self.curtain_durations();
        debug!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            intro,
            outro,
            "Rendering curtains"
        );

        let scratch = output.parent().unwrap_or_else(|| Path::new("."));
        let intro_path = self
            .render_curtain(&info, intro, &scratch.join("intro.mp4"))
            .await?;
        let outro_path = self
            .render_curtain(&info, outro, &scratch.join("outro.mp4"))
            .await?;

        let mut parts = Vec::with_capacity(3);
        parts.extend(intro_path);
        parts.push(input.to_path_buf());
        parts.extend(outro_path);

        let list = scratch.join("concat.txt");
        tokio::fs::write(&list, concat_list(&parts)).await?;

        match self.runner.run(&self.concat_command(&list, output, false)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Stream-copy concat failed, re-encoding: {}", e.detail());
                self.runner
                    .run(&self.concat_command(&list, output, true))
                    .await
            }
        }
    }
}

/// Fade length: a fifth of the curtain, between 0.1s and 0.5s.
fn fade_seconds(seconds: f64) -> f64 {
    (seconds * 0.2).clamp(0.1, 0.5)
}

fn curtain_filter(frame_width: u32, seconds: f64, background_input: usize) -> String {
    let logo_width = ((frame_width as f64 * LOGO_WIDTH_RATIO).round() as u32).max(2);
    let fade = fade_seconds(seconds);
    format!(
        "[0:v]scale={logo_width}:-1,format=rgba,fade=t=in:st=0:d={fade:.3},fade=t=out:st={out:.3}:d={fade:.3}[lg];\
[{background_input}:v][lg]overlay=(W-w)/2:(H-h)/2:enable='between(t,0,{seconds:.3})'[v]",
        out = (seconds - fade).max(0.0),
    )
}

/// Concat demuxer list; single quotes in paths are escaped.
fn concat_list(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(has_audio: bool) -> VideoInfo {
        VideoInfo {
            width: 1280,
            height: 720,
            fps: 30,
            duration: 10.0,
            has_audio,
        }
    }

    #[test]
    fn test_curtain_durations_capped_proportionally() {
        let injector = IntroOutroInjector::new("logo.png", 4.0, 2.0);
        let (intro, outro) = injector.curtain_durations();
        assert!((intro + outro - MAX_CURTAIN_TOTAL_SECS).abs() < 1e-9);
        assert!((intro / outro - 2.0).abs() < 1e-9);

        let injector = IntroOutroInjector::new("logo.png", 2.5, 2.5);
        assert_eq!(injector.curtain_durations(), (2.5, 2.5));
    }

    #[test]
    fn test_fade_is_clamped() {
        assert_eq!(fade_seconds(0.2), 0.1);
        assert!((fade_seconds(1.0) - 0.2).abs() < 1e-9);
        assert_eq!(fade_seconds(10.0), 0.5);
    }

    #[test]
    fn test_curtain_filter() {
        assert_eq!(
            curtain_filter(1280, 2.5, 2),
            "[0:v]scale=448:-1,format=rgba,fade=t=in:st=0:d=0.500,fade=t=out:st=2.000:d=0.500[lg];\
[2:v][lg]overlay=(W-w)/2:(H-h)/2:enable='between(t,0,2.500)'[v]"
        );
    }

    #[test]
    fn test_curtain_with_audio_maps_silence() {
        let injector = IntroOutroInjector::new("logo.png", 2.5, 2.5);
        let args = injector
            .curtain_command(&info(true), 2.5, Path::new("intro.mp4"))
            .build_args()
            .join(" ");
        assert!(args.contains("-loop 1 -t 2.500 -i logo.png"));
        assert!(args.contains("-f lavfi -t 2.500 -i anullsrc=r=48000:cl=stereo"));
        assert!(args.contains("-i color=c=black:s=1280x720:r=30"));
        assert!(args.contains("-map [v] -map 1:a"));
        assert!(args.contains("-r 30 -pix_fmt yuv420p -movflags +faststart"));
    }

    #[test]
    fn test_curtain_without_audio_has_no_audio_input() {
        let injector = IntroOutroInjector::new("logo.png", 2.5, 2.5);
        let args = injector
            .curtain_command(&info(false), 2.5, Path::new("intro.mp4"))
            .build_args()
            .join(" ");
        assert!(!args.contains("anullsrc"));
        assert!(!args.contains("1:a"));
        assert!(args.contains("[1:v][lg]overlay"));
    }

    #[test]
    fn test_concat_copy_then_reencode() {
        let injector = IntroOutroInjector::new("logo.png", 2.5, 2.5);
        let copy = injector
            .concat_command(Path::new("list.txt"), Path::new("out.mp4"), false)
            .build_args()
            .join(" ");
        assert!(copy.contains("-f concat -safe 0 -i list.txt -c copy"));

        let reencode = injector
            .concat_command(Path::new("list.txt"), Path::new("out.mp4"), true)
            .build_args()
            .join(" ");
        assert!(reencode.contains("-c:v libx264 -preset veryfast -crf 23 -c:a aac -b:a 128k"));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/w/intro.mp4"), PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/intro.mp4'\nfile '/w/it'\\''s.mp4'\n");
    }
}

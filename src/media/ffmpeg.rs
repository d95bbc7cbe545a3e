//! ffmpeg/ffprobe-backed transcoder and screenshot generator

use super::parser::{
    ExitStatus, encode_args, escape_filter_path, parse_probe_output, pick_frame_indices,
};
use super::traits::{EncodeSettings, MediaInfo, Screenshot, ScreenshotGenerator, Transcoder};
use crate::types::SubType;
use async_trait::async_trait;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Transcoder and screenshot generator driving external `ffmpeg` and `ffprobe`
///
/// # Examples
///
/// ```no_run
/// use release_relay::media::{FfmpegCli, Transcoder};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ffmpeg = FfmpegCli::from_path().expect("ffmpeg not found in PATH");
/// let info = ffmpeg.probe(Path::new("episode.mkv")).await?;
/// println!("{} frames, text subtitles: {}", info.frame_count, info.has_text_tracks);
/// # Ok(())
/// # }
/// ```
pub struct FfmpegCli {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegCli {
    /// Create with explicit binary paths
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Find both `ffmpeg` and `ffprobe` in PATH
    ///
    /// Returns `None` unless both binaries are found.
    pub fn from_path() -> Option<Self> {
        let ffmpeg = which::which("ffmpeg").ok()?;
        let ffprobe = which::which("ffprobe").ok()?;
        Some(Self::new(ffmpeg, ffprobe))
    }

    async fn extract_frame(
        &self,
        video: &Path,
        frame: u64,
        subtype: SubType,
        output: &Path,
    ) -> crate::Result<()> {
        let mut filter = String::new();
        if subtype == SubType::Softsubs {
            filter.push_str(&format!(
                "subtitles='{}',",
                escape_filter_path(&video.to_string_lossy())
            ));
        }
        filter.push_str(&format!("select=eq(n\\,{})", frame));

        let output_status = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(video)
            .arg("-vf")
            .arg(&filter)
            .arg("-vframes")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(output)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?;

        if !ExitStatus::from(output_status.status.success()).is_success() {
            return Err(crate::Error::Screenshot(format!(
                "frame {}: {}",
                frame,
                String::from_utf8_lossy(&output_status.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegCli {
    async fn probe(&self, input: &Path) -> crate::Result<MediaInfo> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-count_packets")
            .arg(input)
            .output()
            .await
            .map_err(|e| {
                crate::Error::ExternalTool(format!("Failed to execute ffprobe: {}", e))
            })?;

        parse_probe_output(
            &output.stdout,
            &output.stderr,
            ExitStatus::from(output.status.success()),
        )
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
    ) -> crate::Result<u64> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            input = %input.display(),
            output = %output.display(),
            resolution = %settings.resolution,
            "Encoding"
        );

        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .args(encode_args(settings))
            .arg(output)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?;

        if !ExitStatus::from(result.status.success()).is_success() {
            return Err(crate::Error::Transcode {
                path: input.to_path_buf(),
                reason: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size == 0 {
            return Err(crate::Error::Transcode {
                path: input.to_path_buf(),
                reason: format!("no output written to {}", output.display()),
            });
        }
        Ok(size)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[async_trait]
impl ScreenshotGenerator for FfmpegCli {
    async fn generate(
        &self,
        video: &Path,
        subtype: SubType,
        count: usize,
    ) -> crate::Result<Vec<Screenshot>> {
        let info = self.probe(video).await?;
        let frames = pick_frame_indices(info.frame_count, count, &mut rand::thread_rng())
            .ok_or_else(|| {
                crate::Error::Screenshot(format!(
                    "{} has only {} frames",
                    video.display(),
                    info.frame_count
                ))
            })?;

        let work_dir = std::env::temp_dir().join(format!(
            "release-relay-shots-{:016x}",
            rand::thread_rng().r#gen::<u64>()
        ));
        tokio::fs::create_dir_all(&work_dir).await?;

        let mut shots = Vec::with_capacity(frames.len());
        let mut result = Ok(());
        for (index, frame) in frames.iter().enumerate() {
            let file_name = format!("{:02}.jpg", index);
            let path = work_dir.join(&file_name);
            debug!(frame, file = %file_name, "Extracting screenshot");

            if let Err(e) = self.extract_frame(video, *frame, subtype, &path).await {
                result = Err(e);
                break;
            }
            match tokio::fs::read(&path).await {
                Ok(data) => shots.push(Screenshot { file_name, data }),
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }

        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        result.map(|_| shots)
    }
}

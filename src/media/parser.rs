//! Parsers and argument builders for media tool invocations

use super::traits::{EncodeSettings, MediaInfo};
use crate::types::{Resolution, SubType};
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::str;

/// Frames skipped at both ends when picking screenshot frames
pub const FRAME_MARGIN: u64 = 24;

/// Subtitle codecs carried as text
const TEXT_SUBTITLE_CODECS: [&str; 6] = ["ass", "ssa", "subrip", "mov_text", "webvtt", "text"];

/// Exit status of an external command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited successfully (exit code 0)
    Success,
    /// The command exited with a non-zero exit code
    Failure,
}

impl ExitStatus {
    /// Returns `true` if the exit status represents success
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<bool> for ExitStatus {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

/// Parse `ffprobe -print_format json -show_streams -count_packets` output
pub fn parse_probe_output(
    stdout: &[u8],
    stderr: &[u8],
    exit_status: ExitStatus,
) -> crate::Result<MediaInfo> {
    if !exit_status.is_success() {
        let error_output = str::from_utf8(stderr).unwrap_or_default();
        return Err(crate::Error::ExternalTool(format!(
            "ffprobe failed: {}",
            error_output.trim()
        )));
    }

    let probe: ProbeOutput = serde_json::from_slice(stdout)?;

    let has_text_tracks = probe.streams.iter().any(|s| {
        s.codec_type.as_deref() == Some("subtitle")
            && s
                .codec_name
                .as_deref()
                .is_some_and(|c| TEXT_SUBTITLE_CODECS.contains(&c))
    });

    let frame_count = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| {
            s.nb_read_packets
                .as_deref()
                .or(s.nb_frames.as_deref())
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(0);

    Ok(MediaInfo {
        has_text_tracks,
        frame_count,
    })
}

/// Pick `count` distinct frame indices in `[24, total - 24]`, ascending
///
/// Returns `None` when the range holds fewer than `count` frames.
pub fn pick_frame_indices<R: Rng>(total_frames: u64, count: usize, rng: &mut R) -> Option<Vec<u64>> {
    let high = total_frames.checked_sub(FRAME_MARGIN)?;
    if high < FRAME_MARGIN || high - FRAME_MARGIN + 1 < count as u64 {
        return None;
    }

    let mut picked = BTreeSet::new();
    while picked.len() < count {
        picked.insert(rng.gen_range(FRAME_MARGIN..=high));
    }
    Some(picked.into_iter().collect())
}

/// Escape a path for use inside an ffmpeg filter argument
pub fn escape_filter_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '\\' | '\'' | ':' | '[' | ']' | '-' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

fn scale_filter(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::P480 => "scale=848:480:flags=spline+accurate_rnd+full_chroma_int",
        Resolution::P720 => "scale=1280:720:flags=spline+accurate_rnd+full_chroma_int",
        Resolution::P1080 => "scale=1920:1080:flags=spline+accurate_rnd+full_chroma_int",
    }
}

fn audio_bitrate(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::P480 => "96k",
        Resolution::P720 | Resolution::P1080 => "128k",
    }
}

/// ffmpeg arguments (after the input) for one encode
pub fn encode_args(settings: &EncodeSettings) -> Vec<String> {
    let profile = &settings.profile;

    let mut filters = vec![scale_filter(settings.resolution).to_string()];
    if profile.smartblur {
        filters.push("smartblur=1.5:-0.35:-3.5:0.65:0.25:2.0".to_string());
    }

    let mut x265 = vec![
        "me=2".to_string(),
        "rd=4".to_string(),
        "subme=7".to_string(),
        "aq-mode=3".to_string(),
        format!("aq-strength={}", profile.aq_strength),
        format!("deblock={}", profile.deblock),
        format!("psy-rd={}", profile.psy_rd),
        format!("psy-rdoq={}", profile.psy_rdoq),
        "rdoq-level=2".to_string(),
        "merange=57".to_string(),
        "bframes=8".to_string(),
        "b-adapt=2".to_string(),
        "limit-sao=1".to_string(),
        "no-info=1".to_string(),
    ];

    let mut args: Vec<String> = vec!["-map".into(), "0:v:0".into(), "-map".into(), "0:a?".into()];
    if settings.subtype == SubType::Softsubs {
        args.extend(["-map".into(), "0:s?".into(), "-c:s".into(), "copy".into()]);
    }

    if settings.deinterlace {
        filters.push("yadif=1".to_string());
        x265.push("fps=23976/1000".to_string());
        args.extend(["-r".into(), "24000/1001".into()]);
    }

    args.extend([
        "-c:v".into(),
        "libx265".into(),
        "-preset".into(),
        "slow".into(),
        "-profile:v".into(),
        "main".into(),
        "-crf".into(),
        format!("{}", profile.crf),
        "-x265-params".into(),
        x265.join(":"),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-vf".into(),
        filters.join(","),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        audio_bitrate(settings.resolution).into(),
        "-f".into(),
        match settings.subtype {
            SubType::Softsubs => "matroska",
            SubType::Hardsubs => "mp4",
        }
        .into(),
    ]);
    args
}

/// First magnet URI in `imdl torrent link` output
pub fn parse_magnet_output(stdout: &[u8]) -> Option<String> {
    str::from_utf8(stdout)
        .ok()?
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("magnet:?"))
        .map(str::to_string)
}

//! FFprobe-based media metadata: durations for progress and truncation,
//! audio stream detection for the merge graph.

use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use super::discovery::get_ffprobe_path;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den != 0.0).then(|| num / den)
}

fn parse_seconds(s: Option<&String>) -> Option<f64> {
    s.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Container duration in seconds, falling back to the longest stream.
    pub duration: f64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec_name: Option<String>,
    pub video_stream_count: u32,
    pub audio_stream_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_channels: Option<u32>,
}

impl MediaMetadata {
    pub fn has_audio(&self) -> bool {
        self.audio_stream_count > 0
    }

    pub fn has_video(&self) -> bool {
        self.video_stream_count > 0
    }
}

/// Parse ffprobe `-show_format -show_streams` JSON.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let longest_stream = output
        .streams
        .iter()
        .filter_map(|s| parse_seconds(s.duration.as_ref()))
        .fold(0.0_f64, f64::max);
    let duration = format
        .and_then(|f| parse_seconds(f.duration.as_ref()))
        .unwrap_or(longest_stream);
    let size = format
        .and_then(|f| f.size.as_ref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let of_type = |kind: &'static str| {
        output
            .streams
            .iter()
            .filter(move |s| s.codec_type.as_deref() == Some(kind))
    };
    let video = of_type("video").next();
    let audio = of_type("audio").next();

    Ok(MediaMetadata {
        duration,
        size,
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
        fps: video
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
        format_name: format.and_then(|f| f.format_name.clone()),
        video_codec_name: video.and_then(|s| s.codec_name.clone()),
        video_stream_count: of_type("video").count() as u32,
        audio_stream_count: of_type("audio").count() as u32,
        audio_codec_name: audio.and_then(|s| s.codec_name.clone()),
        audio_channels: audio.and_then(|s| s.channels),
    })
}

/// Run ffprobe on a media file and return its metadata.
pub fn get_media_metadata(path: &Path) -> Result<MediaMetadata, AppError> {
    let ffprobe = get_ffprobe_path()?;

    log::debug!(
        target: "voxover::ffmpeg::ffprobe",
        "probing {}",
        path.display()
    );

    let output = Command::new(&ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::ffmpeg_failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8"))?;
    parse_ffprobe_json(&json)
}

//! Test-only wrappers exposed for integration test targets.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::ffmpeg::ffprobe::get_media_metadata;
use crate::merge::{MergeInputs, MergeRequest, MergeStrategy, default_strategies, probe_inputs};

#[derive(Debug, Clone)]
pub struct MediaMetadataForTest {
    pub duration: f64,
    pub size: u64,
    pub video_stream_count: u32,
    pub audio_stream_count: u32,
    pub video_codec_name: Option<String>,
}

/// Probes through the same ffprobe layer the orchestrator uses.
pub fn media_metadata_for_test(path: &Path) -> Result<MediaMetadataForTest, String> {
    let meta = get_media_metadata(path).map_err(|e| e.to_string())?;
    Ok(MediaMetadataForTest {
        duration: meta.duration,
        size: meta.size,
        video_stream_count: meta.video_stream_count,
        audio_stream_count: meta.audio_stream_count,
        video_codec_name: meta.video_codec_name,
    })
}

/// The built-in strategies whose names appear in `names`, in default order.
pub fn strategies_for_test(names: &[&str]) -> Vec<Box<dyn MergeStrategy>> {
    default_strategies()
        .into_iter()
        .filter(|s| names.contains(&s.name()))
        .collect()
}

pub fn probe_inputs_for_test(
    source: PathBuf,
    narration: PathBuf,
    output: PathBuf,
) -> Result<MergeInputs, AppError> {
    let request = MergeRequest::new(source, narration, output, 1.0, 1.0)?;
    Ok(probe_inputs(&request))
}

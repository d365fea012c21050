mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod temp;
mod verify;

pub use builder::{
    MixSpec, build_composite_merge_command, build_filter_graph_merge_command,
    build_frame_sample_args, composite_mix_graph, filter_graph_mix_graph,
    format_args_for_display_multiline, format_gain,
};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use progress::{ProgressLine, classify_line, parse_ffmpeg_progress};
pub use runner::{ProgressCallback, run_ffmpeg_blocking};
pub use temp::{WORKSPACE_PREFIX, Workspace, cleanup_old_workspaces};
#[cfg(any(test, feature = "integration-test-api"))]
pub use verify::verify_decodes;
pub use verify::{ensure_input_file, verify_output};

/// Progress payload for `media.job.progress` events.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegProgressPayload {
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}

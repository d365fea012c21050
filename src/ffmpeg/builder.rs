//! FFmpeg argument builders: the two merge variants and narrator frame sampling.

/// Inputs for a merge command. Gains are linear multipliers in [0,1].
#[derive(Debug, Clone, Copy)]
pub struct MixSpec<'a> {
    pub source: &'a str,
    pub narration: &'a str,
    pub output: &'a str,
    pub video_volume: f64,
    pub audio_volume: f64,
    pub source_has_audio: bool,
}

/// Narration audio bitrate for the composite mix.
const MIX_AUDIO_BITRATE: &str = "192k";
/// Longest edge of frames sent to the narrator.
const FRAME_MAX_EDGE: u32 = 768;
/// Silence standing in for a missing source audio stream.
const SILENCE_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

/// Render a gain as a decimal FFmpeg accepts: `0.3`, `1.0`, `0.0`.
pub fn format_gain(gain: f64) -> String {
    if gain.fract() == 0.0 {
        format!("{:.1}", gain)
    } else {
        format!("{}", gain)
    }
}

fn to_strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Filter graph for the composite mix: plain addition of the two gain-scaled
/// signals (`normalize=0`), cut at the shorter input. A silent source leaves
/// the narration as the whole track.
pub fn composite_mix_graph(spec: &MixSpec) -> String {
    let video = format_gain(spec.video_volume);
    let audio = format_gain(spec.audio_volume);
    if spec.source_has_audio {
        format!(
            "[0:a:0]volume={video}[va];[1:a:0]volume={audio}[aa];[va][aa]amix=inputs=2:duration=shortest:normalize=0[a]"
        )
    } else {
        format!("[1:a:0]volume={audio}[a]")
    }
}

/// Filter graph for the fallback: equal-weight `amix` with its default level
/// compensation. A silent source is replaced by generated silence.
pub fn filter_graph_mix_graph(spec: &MixSpec) -> String {
    let video = format_gain(spec.video_volume);
    let audio = format_gain(spec.audio_volume);
    let video_side = if spec.source_has_audio {
        format!("[0:a]volume={video}[va]")
    } else {
        format!("{SILENCE_SOURCE},volume={video}[va]")
    };
    format!("{video_side};[1:a]volume={audio}[aa];[va][aa]amix=inputs=2:duration=shortest[a]")
}

/// Primary merge: copy the first video stream, AAC-encode the composite mix,
/// report progress on stdout.
pub fn build_composite_merge_command(spec: &MixSpec) -> Vec<String> {
    log::debug!(
        target: "voxover::ffmpeg::builder",
        "Building composite merge: video_volume={}, audio_volume={}, source_has_audio={}, output={}",
        spec.video_volume,
        spec.audio_volume,
        spec.source_has_audio,
        spec.output
    );
    let mut args = to_strings(["-nostdin", "-y", "-progress", "pipe:1", "-i"]);
    args.push(spec.source.to_string());
    args.push("-i".to_string());
    args.push(spec.narration.to_string());
    args.push("-filter_complex".to_string());
    args.push(composite_mix_graph(spec));
    args.extend(to_strings([
        "-map",
        "0:v:0",
        "-map",
        "[a]",
        "-c:v",
        "copy",
        "-c:a",
        "aac",
        "-b:a",
        MIX_AUDIO_BITRATE,
        "-shortest",
        "-movflags",
        "+faststart",
    ]));
    args.push(spec.output.to_string());
    args
}

/// Fallback merge: exactly the raw filter-graph invocation, plus `-y`.
pub fn build_filter_graph_merge_command(spec: &MixSpec) -> Vec<String> {
    let mut args = to_strings(["-y", "-i"]);
    args.push(spec.source.to_string());
    args.push("-i".to_string());
    args.push(spec.narration.to_string());
    args.push("-filter_complex".to_string());
    args.push(filter_graph_mix_graph(spec));
    args.extend(to_strings([
        "-map", "0:v", "-map", "[a]", "-c:v", "copy", "-c:a", "aac", "-shortest",
    ]));
    args.push(spec.output.to_string());
    args
}

/// Grab one JPEG frame at `at_seconds`, scaled down for the vision model.
pub fn build_frame_sample_args(input_path: &str, at_seconds: f64, output_path: &str) -> Vec<String> {
    let mut args = to_strings(["-nostdin", "-y", "-ss"]);
    args.push(format!("{:.3}", at_seconds.max(0.0)));
    args.push("-i".to_string());
    args.push(input_path.to_string());
    args.extend(to_strings(["-frames:v", "1", "-vf"]));
    args.push(format!(
        "scale=w={edge}:h={edge}:force_original_aspect_ratio=decrease",
        edge = FRAME_MAX_EDGE
    ));
    args.extend(to_strings(["-q:v", "4"]));
    args.push(output_path.to_string());
    args
}

fn quote_for_display(arg: &str) -> String {
    if arg.is_empty() || arg.contains([' ', ';', '[', ']', '\'']) {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_string()
    }
}

/// One option per line, its value on the same line; args needing it are shell-quoted.
/// The trailing output path always gets a line of its own.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let output_idx = args.len().saturating_sub(1);
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg.starts_with('-') && i + 1 < output_idx && !args[i + 1].starts_with('-') {
            lines.push(format!("  {} {}", arg, quote_for_display(&args[i + 1])));
            i += 2;
        } else {
            lines.push(format!("  {}", quote_for_display(arg)));
            i += 1;
        }
    }
    lines.join("\n")
}

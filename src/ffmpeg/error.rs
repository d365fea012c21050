//! Map FFmpeg failures to short user-facing summaries.
//!
//! Exit codes follow ffmpeg.c: 1 (general), 69 (rate exceeded), 123 (hard exit),
//! 255 (signal). -1 marks a spawn failure. Well-known stderr lines from merge
//! runs get a more specific summary; the full stderr is always kept as detail.

use serde::Serialize;

/// Error payload for `media.job.error` events and RPC failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

const ELLIPSIS: &str = "…";
const SUMMARY_MAX_LEN: usize = 120;

/// Stderr fragments (lowercased) that identify a specific merge problem.
const STDERR_SUMMARIES: &[(&str, &str)] = &[
    ("matches no streams", "Input is missing an expected audio or video stream."),
    ("no such file or directory", "Input file not found."),
    ("invalid data found when processing input", "Input is not a readable media file."),
    ("permission denied", "Permission denied reading input or writing output."),
    ("could not find tag for codec", "Output container cannot hold the mixed audio."),
];

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = stderr_summary(stderr)
        .map(str::to_string)
        .or_else(|| exit_code.and_then(exit_code_summary))
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("FFmpeg failed (exit code {}).", code),
            None => first_line_truncated(stderr, SUMMARY_MAX_LEN),
        });
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn stderr_summary(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();
    STDERR_SUMMARIES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, summary)| *summary)
}

fn exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Merge was stopped.".into()),
        _ => None,
    }
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_1() {
        let p = parse_ffmpeg_error("", Some(1));
        assert_eq!(p.summary, "FFmpeg failed.");
    }

    #[test]
    fn exit_code_255_is_stopped() {
        let p = parse_ffmpeg_error("", Some(255));
        assert_eq!(p.summary, "Merge was stopped.");
    }

    #[test]
    fn spawn_failure() {
        let p = parse_ffmpeg_error("Failed to spawn FFmpeg", Some(-1));
        assert!(p.summary.contains("not found"));
    }

    #[test]
    fn missing_audio_stream_recognized() {
        let stderr = "Stream specifier ':a' in filtergraph description [0:a]volume=0.3[va] matches no streams.";
        let p = parse_ffmpeg_error(stderr, Some(1));
        assert_eq!(p.summary, "Input is missing an expected audio or video stream.");
        assert_eq!(p.detail, stderr);
    }

    #[test]
    fn missing_file_recognized() {
        let p = parse_ffmpeg_error("/tmp/x.mp3: No such file or directory", Some(1));
        assert_eq!(p.summary, "Input file not found.");
    }

    #[test]
    fn unknown_code_short_summary() {
        let p = parse_ffmpeg_error("something odd", Some(42));
        assert_eq!(p.summary, "FFmpeg failed (exit code 42).");
        assert_eq!(p.detail, "something odd");
    }

    #[test]
    fn no_code_uses_first_line() {
        let p = parse_ffmpeg_error("\nSome random error\nSecond line", None);
        assert_eq!(p.summary, "Some random error");
    }

    #[test]
    fn long_stderr_truncated() {
        let long = "a".repeat(150);
        let p = parse_ffmpeg_error(&long, None);
        assert!(p.summary.len() <= SUMMARY_MAX_LEN);
        assert!(p.summary.ends_with('…'));
    }
}

use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^out_time_(us|ms)=(-?\d+)").expect("invalid out_time regex")
});

/// One line of FFmpeg output, classified for progress tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Input duration announced on stderr, in seconds.
    Duration(f64),
    /// Encoded position from `-progress`, in seconds.
    OutTime(f64),
    /// `progress=end`: the run finished writing.
    End,
    Other,
}

/// Classify a line from stdout (`-progress pipe:1`) or stderr.
/// `out_time_ms` is microseconds despite its name, same as `out_time_us`.
pub fn classify_line(line: &str) -> ProgressLine {
    let line = line.trim();
    if line == "progress=end" {
        return ProgressLine::End;
    }
    if let Some(caps) = OUT_TIME_RE.captures(line) {
        let micros: i64 = caps[2].parse().unwrap_or(0);
        return ProgressLine::OutTime(micros.max(0) as f64 / 1_000_000.0);
    }
    if let Some(caps) = DURATION_RE.captures(line) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        return ProgressLine::Duration(hours * 3600.0 + minutes * 60.0 + seconds);
    }
    ProgressLine::Other
}

/// Fold a line into (progress in [0,1] if known, updated duration).
///
/// A caller-supplied duration wins over the input duration FFmpeg prints:
/// for a merge the output is cut to the shorter input, which FFmpeg does not announce.
pub fn parse_ffmpeg_progress(
    line: &str,
    current_duration: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    match classify_line(line) {
        ProgressLine::Duration(d) => (None, current_duration.or(Some(d))),
        ProgressLine::OutTime(t) => match current_duration {
            Some(dur) if dur > 0.0 => (Some((t / dur).min(1.0)), Some(dur)),
            _ => (None, current_duration),
        },
        ProgressLine::End => (Some(1.0), current_duration),
        ProgressLine::Other => (None, current_duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_line_sets_unknown_duration() {
        let (prog, dur) = parse_ffmpeg_progress("  Duration: 00:01:30.50, start: 0.000000", None);
        assert_eq!(prog, None);
        assert_eq!(dur, Some(90.5));
    }

    #[test]
    fn duration_line_does_not_override_known_duration() {
        let (_, dur) = parse_ffmpeg_progress("Duration: 00:00:10.00", Some(6.0));
        assert_eq!(dur, Some(6.0));
    }

    #[test]
    fn out_time_us_progress() {
        let (prog, dur) = parse_ffmpeg_progress("out_time_us=3000000", Some(6.0));
        assert_eq!(prog, Some(0.5));
        assert_eq!(dur, Some(6.0));
    }

    #[test]
    fn out_time_ms_is_microseconds() {
        let (prog, _) = parse_ffmpeg_progress("out_time_ms=6000000", Some(6.0));
        assert_eq!(prog, Some(1.0));
    }

    #[test]
    fn negative_out_time_clamps_to_zero() {
        assert_eq!(classify_line("out_time_us=-23220"), ProgressLine::OutTime(0.0));
    }

    #[test]
    fn progress_end_completes() {
        let (prog, _) = parse_ffmpeg_progress("progress=end", None);
        assert_eq!(prog, Some(1.0));
    }

    #[test]
    fn out_time_without_duration_is_unknown() {
        let (prog, dur) = parse_ffmpeg_progress("out_time_us=1000", None);
        assert_eq!(prog, None);
        assert_eq!(dur, None);
    }

    #[test]
    fn unrelated_line_keeps_duration() {
        assert_eq!(classify_line("frame=42"), ProgressLine::Other);
        let (prog, dur) = parse_ffmpeg_progress("frame=42", Some(5.0));
        assert_eq!(prog, None);
        assert_eq!(dur, Some(5.0));
    }
}

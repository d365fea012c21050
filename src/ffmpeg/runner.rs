//! Blocking FFmpeg runs.
//!
//! stdout carries `-progress pipe:1` key=value lines, stderr carries the log.
//! Each stream is drained on its own thread; both threads are joined before
//! the exit status is read. There is no cancellation.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::discovery::get_ffmpeg_path;
use super::progress::parse_ffmpeg_progress;
use crate::error::AppError;

const TARGET: &str = "voxover::ffmpeg::runner";

const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
const PROGRESS_EMIT_STEP: f64 = 0.01;
const MAX_STDERR_BYTES: usize = 64 * 1024;

pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Duration shared by both reader threads. stderr announces the input
/// duration, stdout needs it to normalize `out_time`.
#[derive(Clone)]
struct SharedDuration(Arc<AtomicU64>);

impl SharedDuration {
    const UNKNOWN: u64 = u64::MAX;

    fn new(seed: Option<f64>) -> Self {
        let bits = seed
            .filter(|d| *d > 0.0)
            .map_or(Self::UNKNOWN, f64::to_bits);
        Self(Arc::new(AtomicU64::new(bits)))
    }

    fn get(&self) -> Option<f64> {
        match self.0.load(Ordering::Relaxed) {
            Self::UNKNOWN => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Parse `line`, remember any duration it carries, return its progress.
    fn fold(&self, line: &str) -> Option<f64> {
        let (progress, duration) = parse_ffmpeg_progress(line, self.get());
        if let Some(d) = duration {
            self.0.store(d.to_bits(), Ordering::Relaxed);
        }
        progress
    }
}

/// Rate-limits progress callbacks; completion always passes.
struct ProgressThrottle {
    callback: ProgressCallback,
    last_at: Option<Instant>,
    last_value: f64,
}

impl ProgressThrottle {
    fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            last_at: None,
            last_value: 0.0,
        }
    }

    fn offer(&mut self, value: f64, now: Instant) {
        let due = match self.last_at {
            None => true,
            Some(at) => {
                now.duration_since(at) >= PROGRESS_EMIT_INTERVAL
                    || (value - self.last_value).abs() >= PROGRESS_EMIT_STEP
                    || value >= 1.0
            }
        };
        if due {
            self.last_at = Some(now);
            self.last_value = value;
            (self.callback)(value);
        }
    }
}

/// Last `MAX_STDERR_BYTES` of stderr, line by line.
#[derive(Default)]
struct StderrTail(Vec<u8>);

impl StderrTail {
    fn push_line(&mut self, line: &str) {
        self.0.extend_from_slice(line.as_bytes());
        self.0.push(b'\n');
        if self.0.len() > MAX_STDERR_BYTES {
            let excess = self.0.len() - MAX_STDERR_BYTES;
            self.0.drain(..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

fn for_each_line<R: Read>(reader: R, mut f: impl FnMut(&str)) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    while reader.read_until(b'\n', &mut buf).unwrap_or(0) > 0 {
        let line = String::from_utf8_lossy(&buf);
        f(line.trim_end_matches(['\n', '\r']));
        buf.clear();
    }
}

fn spawn_progress_reader<R: Read + Send + 'static>(
    stdout: R,
    duration: SharedDuration,
    callback: Option<ProgressCallback>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut throttle = callback.map(ProgressThrottle::new);
        for_each_line(stdout, |line| {
            if let (Some(p), Some(t)) = (duration.fold(line), throttle.as_mut()) {
                t.offer(p, Instant::now());
            }
        });
    })
}

fn spawn_stderr_reader<R: Read + Send + 'static>(
    stderr: R,
    duration: SharedDuration,
) -> thread::JoinHandle<StderrTail> {
    thread::spawn(move || {
        let mut tail = StderrTail::default();
        for_each_line(stderr, |line| {
            duration.fold(line);
            tail.push_line(line);
        });
        tail
    })
}

/// Run FFmpeg with `args` and block until it exits.
///
/// `duration_secs` is the expected output duration. It takes precedence over
/// the input duration FFmpeg logs, so progress reaches 1.0 when the output
/// is cut short. `progress` receives throttled values in [0,1].
///
/// A non-zero exit is `FfmpegFailed` carrying the tail of stderr.
pub fn run_ffmpeg_blocking(
    args: Vec<String>,
    duration_secs: Option<f64>,
    progress: Option<ProgressCallback>,
) -> Result<(), AppError> {
    let ffmpeg_path = get_ffmpeg_path()?;
    let inputs: Vec<&String> = args
        .windows(2)
        .filter(|w| w[0] == "-i")
        .map(|w| &w[1])
        .collect();
    log::debug!(
        target: TARGET,
        "spawning {}: inputs={:?}, output={:?}",
        ffmpeg_path.display(),
        inputs,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg_path);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn FFmpeg: {}", e))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::from("Failed to capture FFmpeg output"));
    };

    let duration = SharedDuration::new(duration_secs);
    let progress_reader = spawn_progress_reader(stdout, duration.clone(), progress);
    let stderr_reader = spawn_stderr_reader(stderr, duration);
    let _ = progress_reader.join();
    let stderr = stderr_reader.join().unwrap_or_default().into_string();

    let status = child.wait()?;
    if status.success() {
        log::debug!(target: TARGET, "ffmpeg exited cleanly");
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    let last_lines: Vec<&str> = stderr.lines().rev().take(3).collect();
    log::error!(target: TARGET, "ffmpeg failed (code={}): {}", code, last_lines.join("; "));
    Err(AppError::FfmpegFailed { code, stderr })
}

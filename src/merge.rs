//! Media merge orchestrator.
//!
//! Mixes a narration track onto a video: the video stream is copied, the
//! source audio and the narration are each scaled by their own linear gain and
//! summed, and the result is cut to the shorter input. Strategies are tried in
//! order (composite mix, then the raw filter-graph command); the first one
//! whose output exists with non-zero size wins. The narration file is backed
//! up before the first attempt and restored before any later attempt if it
//! has gone missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AppError;
use crate::ffmpeg::ffprobe::get_media_metadata;
use crate::ffmpeg::{
    MixSpec, ProgressCallback, build_composite_merge_command, build_filter_graph_merge_command,
    ensure_input_file, path_to_string, run_ffmpeg_blocking, verify_output,
};

const TARGET: &str = "voxover::merge";

/// Linear volume multiplier in [0.0, 1.0]. Not decibels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain(f64);

impl Gain {
    /// `name` identifies the parameter in the error (`videoVolume`, `audioVolume`).
    pub fn new(name: &'static str, value: f64) -> Result<Self, AppError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(AppError::InvalidVolumeParameter { name, value })
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// One merge invocation. Built fresh per call and never mutated.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    source_video: PathBuf,
    narration_audio: PathBuf,
    output: PathBuf,
    video_volume: Gain,
    audio_volume: Gain,
}

impl MergeRequest {
    pub fn new(
        source_video: impl Into<PathBuf>,
        narration_audio: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        video_volume: f64,
        audio_volume: f64,
    ) -> Result<Self, AppError> {
        Ok(Self {
            source_video: source_video.into(),
            narration_audio: narration_audio.into(),
            output: output.into(),
            video_volume: Gain::new("videoVolume", video_volume)?,
            audio_volume: Gain::new("audioVolume", audio_volume)?,
        })
    }

    pub fn source_video(&self) -> &Path {
        &self.source_video
    }

    pub fn narration_audio(&self) -> &Path {
        &self.narration_audio
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn video_volume(&self) -> Gain {
        self.video_volume
    }

    pub fn audio_volume(&self) -> Gain {
        self.audio_volume
    }
}

/// Facts about the inputs, gathered once before the first attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeInputs {
    pub source_has_audio: bool,
    /// `min(source, narration)` when both durations are known.
    pub expected_duration: Option<f64>,
}

impl Default for MergeInputs {
    fn default() -> Self {
        Self {
            source_has_audio: true,
            expected_duration: None,
        }
    }
}

/// Probe both inputs with ffprobe. Probe failures fall back to assuming the
/// source has audio; the strategies then surface FFmpeg's own diagnostics.
pub fn probe_inputs(request: &MergeRequest) -> MergeInputs {
    let source = get_media_metadata(request.source_video());
    let narration = get_media_metadata(request.narration_audio());
    let source_has_audio = match &source {
        Ok(meta) => meta.has_audio(),
        Err(e) => {
            log::warn!(target: TARGET, "could not probe source video: {}", e);
            true
        }
    };
    let expected_duration = match (&source, &narration) {
        (Ok(s), Ok(n)) if s.duration > 0.0 && n.duration > 0.0 => Some(s.duration.min(n.duration)),
        _ => None,
    };
    MergeInputs {
        source_has_audio,
        expected_duration,
    }
}

/// Everything a strategy needs for one attempt.
pub struct MergeContext<'a> {
    pub request: &'a MergeRequest,
    pub inputs: MergeInputs,
    pub progress: Option<ProgressCallback>,
}

impl MergeContext<'_> {
    fn run_with_spec(
        &self,
        build: impl FnOnce(&MixSpec) -> Vec<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), AppError> {
        let source = path_to_string(self.request.source_video());
        let narration = path_to_string(self.request.narration_audio());
        let output = path_to_string(self.request.output());
        let args = build(&MixSpec {
            source: &source,
            narration: &narration,
            output: &output,
            video_volume: self.request.video_volume().value(),
            audio_volume: self.request.audio_volume().value(),
            source_has_audio: self.inputs.source_has_audio,
        });
        run_ffmpeg_blocking(args, self.inputs.expected_duration, progress)
    }
}

/// One way of producing the merged file. Returning Ok is not enough: the
/// orchestrator still checks the output on disk.
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &MergeContext<'_>) -> Result<(), AppError>;
}

/// Primary: additive mix built from the probed stream layout, video copied.
pub struct CompositeMix;

impl MergeStrategy for CompositeMix {
    fn name(&self) -> &'static str {
        "composite_mix"
    }

    fn run(&self, ctx: &MergeContext<'_>) -> Result<(), AppError> {
        ctx.run_with_spec(build_composite_merge_command, ctx.progress.clone())
    }
}

/// Fallback: the fixed `-filter_complex` invocation with `amix` level compensation.
pub struct FilterGraphMix;

impl MergeStrategy for FilterGraphMix {
    fn name(&self) -> &'static str {
        "filter_graph_mix"
    }

    fn run(&self, ctx: &MergeContext<'_>) -> Result<(), AppError> {
        // This invocation has no -progress output to report.
        ctx.run_with_spec(build_filter_graph_merge_command, None)
    }
}

pub fn default_strategies() -> Vec<Box<dyn MergeStrategy>> {
    vec![Box::new(CompositeMix), Box::new(FilterGraphMix)]
}

static NEXT_BACKUP_ID: AtomicU64 = AtomicU64::new(1);

/// Copy of the narration taken before the first attempt; removed on drop.
struct NarrationBackup {
    original: PathBuf,
    backup: PathBuf,
}

impl NarrationBackup {
    fn take(original: &Path) -> Result<Self, AppError> {
        let id = NEXT_BACKUP_ID.fetch_add(1, Ordering::Relaxed);
        let file_name = original
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "narration".to_string());
        let backup_name = format!(".{}.{}-{}.backup", file_name, std::process::id(), id);
        let sibling = original.with_file_name(&backup_name);
        let backup = match fs::copy(original, &sibling) {
            Ok(_) => sibling,
            Err(e) => {
                log::debug!(
                    target: TARGET,
                    "sibling backup failed ({}); using temp dir",
                    e
                );
                let in_temp = std::env::temp_dir().join(&backup_name);
                fs::copy(original, &in_temp)?;
                in_temp
            }
        };
        Ok(Self {
            original: original.to_path_buf(),
            backup,
        })
    }

    /// Put the narration back if an attempt removed or emptied it. Returns true if restored.
    fn restore_if_missing(&self) -> Result<bool, AppError> {
        if ensure_input_file(&self.original).is_ok() {
            return Ok(false);
        }
        log::warn!(
            target: TARGET,
            "narration {} missing before retry; restoring from backup",
            self.original.display()
        );
        fs::copy(&self.backup, &self.original)?;
        Ok(true)
    }
}

impl Drop for NarrationBackup {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.backup);
    }
}

fn remove_output(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!(target: TARGET, "removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(target: TARGET, "could not remove {}: {}", path.display(), e),
    }
}

type ProbeFn = Box<dyn Fn(&MergeRequest) -> MergeInputs + Send + Sync>;

/// Ordered strategy list plus the input probe.
pub struct MergeOrchestrator {
    strategies: Vec<Box<dyn MergeStrategy>>,
    probe: ProbeFn,
}

impl Default for MergeOrchestrator {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl MergeOrchestrator {
    pub fn new(strategies: Vec<Box<dyn MergeStrategy>>) -> Self {
        Self {
            strategies,
            probe: Box::new(probe_inputs),
        }
    }

    /// Replace the ffprobe-based input probe.
    pub fn with_probe(
        mut self,
        probe: impl Fn(&MergeRequest) -> MergeInputs + Send + Sync + 'static,
    ) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Merge and return the output path. Blocks until FFmpeg exits.
    ///
    /// Inputs are checked before anything is spawned. A failed attempt's
    /// output is deleted, so an `Err` never leaves a file that looks valid.
    pub fn merge(
        &self,
        request: &MergeRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf, AppError> {
        ensure_input_file(request.source_video())?;
        ensure_input_file(request.narration_audio())?;
        reject_aliased_output(request)?;
        if self.strategies.is_empty() {
            return Err(AppError::Config("no merge strategies configured".into()));
        }

        let inputs = (self.probe)(request);
        log::info!(
            target: TARGET,
            "merge: source={}, narration={}, output={}, video_volume={}, audio_volume={}, source_has_audio={}",
            request.source_video().display(),
            request.narration_audio().display(),
            request.output().display(),
            request.video_volume().value(),
            request.audio_volume().value(),
            inputs.source_has_audio
        );

        let backup = NarrationBackup::take(request.narration_audio())?;
        let ctx = MergeContext {
            request,
            inputs,
            progress,
        };
        let last = self.strategies.len() - 1;
        let mut escalation: Option<AppError> = None;

        for (idx, strategy) in self.strategies.iter().enumerate() {
            if idx > 0 {
                backup.restore_if_missing()?;
            }
            remove_output(request.output());

            let attempt = strategy
                .run(&ctx)
                .and_then(|()| verify_output(request.output()));
            match attempt {
                Ok(size) => {
                    log::info!(
                        target: TARGET,
                        "{} produced {} ({} bytes)",
                        strategy.name(),
                        request.output().display(),
                        size
                    );
                    return Ok(request.output().to_path_buf());
                }
                Err(err) => {
                    remove_output(request.output());
                    if idx == last {
                        log::error!(target: TARGET, "{} failed: {}", strategy.name(), err);
                        return Err(terminal_error(err, escalation));
                    }
                    let failure = AppError::PrimaryMergeFailure(format!("{}: {}", strategy.name(), err));
                    log::warn!(
                        target: TARGET,
                        "{}; escalating to {}",
                        failure,
                        self.strategies[idx + 1].name()
                    );
                    escalation = Some(failure);
                }
            }
        }
        // The loop returns on the last strategy.
        Err(AppError::Config("no merge strategies configured".into()))
    }
}

/// Same file on disk when both resolve, otherwise the paths as given.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// The output is deleted before and after attempts; it must never be an input.
fn reject_aliased_output(request: &MergeRequest) -> Result<(), AppError> {
    let output = request.output();
    for (name, input) in [
        ("source video", request.source_video()),
        ("narration audio", request.narration_audio()),
    ] {
        if same_file(output, input) {
            return Err(AppError::InvalidParameter(format!(
                "output {} is the {}",
                output.display(),
                name
            )));
        }
    }
    Ok(())
}

/// FFmpeg failures of the final attempt become `FallbackMergeFailure`, keeping
/// stderr verbatim; everything else (verification, spawn, I/O) passes through.
fn terminal_error(err: AppError, escalation: Option<AppError>) -> AppError {
    match err {
        AppError::FfmpegFailed { code, stderr } if code != -1 => AppError::FallbackMergeFailure {
            code,
            stderr,
            primary: escalation.map(|e| e.to_string()).unwrap_or_default(),
        },
        other => other,
    }
}

/// Merge with the default strategies and the ffprobe input probe.
pub fn merge(request: &MergeRequest) -> Result<PathBuf, AppError> {
    MergeOrchestrator::default().merge(request, None)
}

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::auth::CredentialGate;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::ffmpeg::ffprobe::{MediaMetadata, get_media_metadata};
use crate::ffmpeg::{
    FfmpegProgressPayload, MixSpec, ProgressCallback, Workspace, build_composite_merge_command,
    build_filter_graph_merge_command, cleanup_old_workspaces, ensure_input_file,
    format_args_for_display_multiline, path_to_string,
};
use crate::merge::{Gain, MergeOrchestrator, MergeRequest};
use crate::narrator::{Narrator, OpenAiNarrator};
use crate::session::{SessionState, UPLOAD_EXTENSIONS};
use crate::speaker::{OpenAiSpeaker, Speaker, SpeechSettings, VoiceName};

pub type SidecarProgressEmitter = Arc<dyn Fn(FfmpegProgressPayload) + Send + Sync>;

const PROTOCOL_VERSION: u8 = 1;
const TARGET: &str = "voxover::studio";

/// The only handle a caller holds after login; random, never sequential.
fn make_session_id() -> String {
    format!("session-{}", Uuid::new_v4().simple())
}

fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Copy to `dest` through a sibling temp file so `dest` only ever holds a complete file.
fn copy_into_place(source: &Path, dest: &Path) -> Result<(), AppError> {
    let staging = dest.with_extension("part");
    fs::copy(source, &staging)?;
    match fs::rename(&staging, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_rename_error(&e) => {
            fs::copy(&staging, dest)?;
            fs::remove_file(&staging)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&staging);
            Err(e.into())
        }
    }
}

fn emit(emitter: Option<&SidecarProgressEmitter>, progress: f64, step: &str) {
    if let Some(emit) = emitter {
        emit(FfmpegProgressPayload {
            progress,
            step: Some(step.to_string()),
        });
    }
}

/// Stands in for a collaborator that could not be configured; every call
/// reports the original configuration error.
struct Unavailable {
    reason: String,
}

impl From<AppError> for Unavailable {
    fn from(err: AppError) -> Self {
        let reason = match err {
            AppError::Config(message) => message,
            other => other.to_string(),
        };
        Self { reason }
    }
}

impl Narrator for Unavailable {
    fn describe_and_script(&self, _video: &Path, _instructions: &str) -> Result<String, AppError> {
        Err(AppError::Config(self.reason.clone()))
    }
}

impl Speaker for Unavailable {
    fn synthesize(&self, _text: &str, _settings: SpeechSettings, _output: &Path) -> Result<(), AppError> {
        Err(AppError::Config(self.reason.clone()))
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
    pub auth_configured: bool,
    pub ai_configured: bool,
    pub voices: Vec<&'static str>,
    pub merge_strategies: Vec<&'static str>,
    pub default_video_volume: f64,
    pub default_audio_volume: f64,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadataResult {
    #[serde(flatten)]
    meta: MediaMetadata,
    size_mb: f64,
    has_audio: bool,
}

impl From<MediaMetadata> for MediaMetadataResult {
    fn from(meta: MediaMetadata) -> Self {
        let size_mb = meta.size as f64 / 1024.0 / 1024.0;
        let has_audio = meta.has_audio();
        Self {
            meta: MediaMetadata {
                fps: (meta.fps * 100.0).round() / 100.0,
                ..meta
            },
            size_mb,
            has_audio,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCommandPreviewParams {
    pub input_path: Option<String>,
    pub narration_path: Option<String>,
    #[serde(default = "default_video_volume")]
    pub video_volume: f64,
    #[serde(default = "default_audio_volume")]
    pub audio_volume: f64,
    #[serde(default = "default_true")]
    pub source_has_audio: bool,
}

fn default_video_volume() -> f64 {
    crate::session::DEFAULT_VIDEO_VOLUME
}

fn default_audio_volume() -> f64 {
    crate::session::DEFAULT_AUDIO_VOLUME
}

fn default_true() -> bool {
    true
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCommandPreview {
    pub primary: String,
    pub fallback: String,
}

pub fn get_media_metadata_result(path: PathBuf) -> Result<MediaMetadataResult, AppError> {
    ensure_input_file(&path)?;
    Ok(get_media_metadata(&path)?.into())
}

/// Both merge invocations as they would run, for display.
pub fn preview_merge_commands(params: &MergeCommandPreviewParams) -> Result<MergeCommandPreview, AppError> {
    let video_volume = Gain::new("videoVolume", params.video_volume)?;
    let audio_volume = Gain::new("audioVolume", params.audio_volume)?;
    let spec = MixSpec {
        source: params.input_path.as_deref().unwrap_or("<input>"),
        narration: params.narration_path.as_deref().unwrap_or("<narration>"),
        output: "<output>",
        video_volume: video_volume.value(),
        audio_volume: audio_volume.value(),
        source_has_audio: params.source_has_audio,
    };
    Ok(MergeCommandPreview {
        primary: format!(
            "ffmpeg\n{}",
            format_args_for_display_multiline(&build_composite_merge_command(&spec))
        ),
        fallback: format!(
            "ffmpeg\n{}",
            format_args_for_display_multiline(&build_filter_graph_merge_command(&spec))
        ),
    })
}

struct SessionEntry {
    state: Arc<SessionState>,
    workspace: Workspace,
}

/// The narration studio: credential gate, collaborators and per-session
/// snapshots. Every action reads the current snapshot, does its work without
/// holding the lock, and stores the derived snapshot.
pub struct Studio {
    config: AppConfig,
    gate: CredentialGate,
    narrator: Arc<dyn Narrator>,
    speaker: Arc<dyn Speaker>,
    merger: Arc<MergeOrchestrator>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Studio {
    pub fn new(
        config: AppConfig,
        narrator: Arc<dyn Narrator>,
        speaker: Arc<dyn Speaker>,
        merger: MergeOrchestrator,
    ) -> Self {
        Self {
            gate: CredentialGate::from_config(&config),
            config,
            narrator,
            speaker,
            merger: Arc::new(merger),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// OpenAI collaborators and the default merge strategies. Missing API
    /// configuration surfaces when narration or speech is first requested.
    pub fn from_config(config: AppConfig) -> Self {
        let narrator: Arc<dyn Narrator> = match OpenAiNarrator::from_config(&config) {
            Ok(narrator) => Arc::new(narrator),
            Err(e) => Arc::new(Unavailable::from(e)),
        };
        let speaker: Arc<dyn Speaker> = match OpenAiSpeaker::from_config(&config) {
            Ok(speaker) => Arc::new(speaker),
            Err(e) => Arc::new(Unavailable::from(e)),
        };
        Self::new(config, narrator, speaker, MergeOrchestrator::default())
    }

    pub fn capabilities(&self) -> AppCapabilitiesResult {
        let ffmpeg = crate::ffmpeg::discovery::get_ffmpeg_path();
        AppCapabilitiesResult {
            protocol_version: PROTOCOL_VERSION,
            ffmpeg_available: ffmpeg.is_ok(),
            ffmpeg_path: ffmpeg.ok().map(|p| path_to_string(p)),
            auth_configured: self.gate.is_configured(),
            ai_configured: self.config.openai_api_key.is_some(),
            voices: VoiceName::ALL.iter().map(|v| v.as_str()).collect(),
            merge_strategies: self.merger.strategy_names(),
            default_video_volume: crate::session::DEFAULT_VIDEO_VOLUME,
            default_audio_volume: crate::session::DEFAULT_AUDIO_VOLUME,
        }
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Arc<SessionState>, AppError> {
        self.gate.check(username, password)?;
        let workspace = Workspace::create_in(&self.config.work_dir)?;
        let state = Arc::new(SessionState::opened(make_session_id()));
        log::info!(
            target: TARGET,
            "opened {} in {}",
            state.session_id,
            workspace.root().display()
        );
        self.sessions.lock().insert(
            state.session_id.clone(),
            SessionEntry {
                state: Arc::clone(&state),
                workspace,
            },
        );
        Ok(state)
    }

    /// Reset, then close the session and delete its workspace.
    pub fn logout(&self, session_id: &str) -> Result<(), AppError> {
        let entry = self
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        entry.workspace.remove()?;
        log::info!(target: TARGET, "closed {}", session_id);
        Ok(())
    }

    pub fn state(&self, session_id: &str) -> Result<Arc<SessionState>, AppError> {
        self.snapshot(session_id).map(|(state, _)| state)
    }

    fn snapshot(&self, session_id: &str) -> Result<(Arc<SessionState>, Workspace), AppError> {
        let guard = self.sessions.lock();
        let entry = guard.get(session_id).ok_or_else(|| unknown_session(session_id))?;
        Ok((Arc::clone(&entry.state), entry.workspace.clone()))
    }

    /// Store `next` unless the session was reset or closed meanwhile.
    fn commit(&self, previous: &SessionState, next: SessionState) -> Result<Arc<SessionState>, AppError> {
        let mut guard = self.sessions.lock();
        let entry = guard
            .get_mut(&previous.session_id)
            .ok_or_else(|| unknown_session(&previous.session_id))?;
        if entry.state.unique_id != previous.unique_id {
            return Err(AppError::Session(
                "Session was reset while the action was running".into(),
            ));
        }
        entry.state = Arc::new(next);
        Ok(Arc::clone(&entry.state))
    }

    /// Record a failure on the snapshot and hand the error back.
    fn fail<T>(&self, previous: &SessionState, err: AppError) -> Result<T, AppError> {
        log::warn!(target: TARGET, "{}: {}", previous.session_id, err);
        let _ = self.commit(previous, previous.failed(err.to_string()));
        Err(err)
    }

    /// Pass `result` through, recording an error on the snapshot first.
    fn recorded<T>(&self, previous: &SessionState, result: Result<T, AppError>) -> Result<T, AppError> {
        result.or_else(|err| self.fail(previous, err))
    }

    pub fn upload(&self, session_id: &str, input_path: &Path) -> Result<Arc<SessionState>, AppError> {
        let (state, workspace) = self.snapshot(session_id)?;
        let ext = self.recorded(&state, upload_extension(&state, input_path))?;
        let stored = workspace.path(&state.uploaded_name(&ext));
        if let Err(e) = copy_into_place(input_path, &stored) {
            return self.fail(&state, e);
        }
        let original_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        log::info!(target: TARGET, "{}: uploaded {}", session_id, original_name);
        self.commit(&state, state.with_upload(stored, original_name))
    }

    /// Clear every artifact and issue a new unique id.
    pub fn reset(&self, session_id: &str) -> Result<Arc<SessionState>, AppError> {
        let mut guard = self.sessions.lock();
        let entry = guard
            .get_mut(session_id)
            .ok_or_else(|| unknown_session(session_id))?;
        entry.workspace.clear()?;
        entry.state = Arc::new(entry.state.reset());
        Ok(Arc::clone(&entry.state))
    }

    pub fn set_volumes(
        &self,
        session_id: &str,
        video_volume: f64,
        audio_volume: f64,
    ) -> Result<Arc<SessionState>, AppError> {
        let (state, _) = self.snapshot(session_id)?;
        let gains = Gain::new("videoVolume", video_volume)
            .and_then(|video| Ok((video, Gain::new("audioVolume", audio_volume)?)));
        let (video, audio) = self.recorded(&state, gains)?;
        self.commit(&state, state.with_volumes(video.value(), audio.value()))
    }

    pub fn generate_script(
        &self,
        session_id: &str,
        instructions: &str,
        emitter: Option<SidecarProgressEmitter>,
    ) -> Result<Arc<SessionState>, AppError> {
        let (state, _) = self.snapshot(session_id)?;
        let ready = match (&state.uploaded_video, instructions.trim().is_empty()) {
            (None, _) => Err(AppError::Session("Upload a video first".into())),
            (Some(_), true) => Err(AppError::InvalidParameter(
                "Please provide instructions for the voiceover style and content.".into(),
            )),
            (Some(video), false) => Ok(video.clone()),
        };
        let video = self.recorded(&state, ready)?;
        let analyzing = self.commit(&state, state.analyzing())?;
        emit(emitter.as_ref(), 0.0, "analyzing_video");

        match self.narrator.describe_and_script(&video, instructions) {
            Ok(script) => {
                emit(emitter.as_ref(), 1.0, "script_ready");
                self.commit(&analyzing, analyzing.with_script(script))
            }
            Err(e) => self.fail(&analyzing, e),
        }
    }

    /// Synthesize `text`, or the stored script when `text` is None.
    pub fn synthesize(
        &self,
        session_id: &str,
        text: Option<String>,
        settings: SpeechSettings,
        emitter: Option<SidecarProgressEmitter>,
    ) -> Result<Arc<SessionState>, AppError> {
        let (state, workspace) = self.snapshot(session_id)?;
        let text = text
            .or_else(|| state.script.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::Session("Generate or enter a narration script first".into()));
        let text = self.recorded(&state, text)?;
        let output = workspace.path(&state.narration_name());
        let synthesizing = self.commit(&state, state.synthesizing())?;
        emit(emitter.as_ref(), 0.0, "synthesizing");

        match self.speaker.synthesize(&text, settings, &output) {
            Ok(()) => {
                if let Err(e) = ensure_input_file(&output) {
                    return self.fail(&synthesizing, e);
                }
                emit(emitter.as_ref(), 1.0, "audio_ready");
                self.commit(&synthesizing, synthesizing.with_narration(output, text))
            }
            Err(e) => self.fail(&synthesizing, e),
        }
    }

    /// Merge the uploaded video with the narration. Volumes default to the
    /// session's current levels.
    pub fn merge(
        &self,
        session_id: &str,
        video_volume: Option<f64>,
        audio_volume: Option<f64>,
        emitter: Option<SidecarProgressEmitter>,
    ) -> Result<Arc<SessionState>, AppError> {
        let (state, workspace) = self.snapshot(session_id)?;
        let request = match (state.uploaded_video.clone(), state.narration_audio.clone()) {
            (Some(video), Some(narration)) => MergeRequest::new(
                video,
                narration,
                workspace.path(&state.merged_name()),
                video_volume.unwrap_or(state.video_volume),
                audio_volume.unwrap_or(state.audio_volume),
            ),
            _ => Err(AppError::Session(
                "Upload a video and generate narration audio first".into(),
            )),
        };
        let request = self.recorded(&state, request)?;
        let merging = self.commit(
            &state,
            state
                .with_volumes(request.video_volume().value(), request.audio_volume().value())
                .merging(),
        )?;
        emit(emitter.as_ref(), 0.0, "merging");

        let progress: Option<ProgressCallback> = emitter.as_ref().map(|emit| {
            let emit = Arc::clone(emit);
            Arc::new(move |progress: f64| {
                emit(FfmpegProgressPayload {
                    progress,
                    step: Some("merging".to_string()),
                });
            }) as ProgressCallback
        });
        match self.merger.merge(&request, progress) {
            Ok(output) => {
                emit(emitter.as_ref(), 1.0, "merge_complete");
                self.commit(&merging, merging.with_merged(output))
            }
            Err(e) => self.fail(&merging, e),
        }
    }

    /// Copy the merged video out of the workspace. A directory destination
    /// gets the suggested download name.
    pub fn export(&self, session_id: &str, dest: &Path) -> Result<PathBuf, AppError> {
        let (state, _) = self.snapshot(session_id)?;
        let merged = state
            .merged_video
            .clone()
            .ok_or_else(|| AppError::Session("Nothing to download yet; merge first".into()))?;
        let dest = if dest.is_dir() {
            dest.join(state.download_name())
        } else {
            dest.to_path_buf()
        };
        copy_into_place(&merged, &dest)?;
        log::info!(target: TARGET, "{}: exported {}", session_id, dest.display());
        Ok(dest)
    }

    pub fn cleanup_startup(&self, max_age: Duration) -> usize {
        cleanup_old_workspaces(&self.config.work_dir, max_age)
    }

    /// Delete every open session's workspace.
    pub fn cleanup_on_exit(&self) {
        let mut guard = self.sessions.lock();
        for (id, entry) in guard.drain() {
            if let Err(e) = entry.workspace.remove() {
                log::warn!(target: TARGET, "failed to remove workspace for {}: {}", id, e);
            }
        }
    }
}

fn unknown_session(session_id: &str) -> AppError {
    AppError::Session(format!("Unknown sessionId: {}", session_id))
}

/// Lowercased extension of an acceptable upload into `state`.
fn upload_extension(state: &SessionState, input_path: &Path) -> Result<String, AppError> {
    if state.uploaded_video.is_some() {
        return Err(AppError::Session(
            "A video is already uploaded; start over to use another".into(),
        ));
    }
    ensure_input_file(input_path)?;
    input_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| UPLOAD_EXTENSIONS.contains(&e.as_str()))
        .ok_or_else(|| {
            AppError::InvalidParameter(format!(
                "Unsupported video type (expected one of: {})",
                UPLOAD_EXTENSIONS.join(", ")
            ))
        })
}

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use voxover_core::config::AppConfig;
use voxover_core::error::AppError;
use voxover_core::ffmpeg::FfmpegProgressPayload;
use voxover_core::sidecar_api::{self, MergeCommandPreviewParams, Studio};
use voxover_core::speaker::{SpeechSettings, VoiceName};

const STARTUP_CLEANUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum JobKind {
    Narration,
    Speech,
    Merge,
}

impl JobKind {
    fn from_method(method: &str) -> Option<Self> {
        match method {
            "narration.generate" => Some(Self::Narration),
            "speech.synthesize" => Some(Self::Speech),
            "media.merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveJob {
    job_id: u64,
    kind: JobKind,
}

#[derive(Clone)]
struct JobState {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self, kind: JobKind) -> Result<ActiveJob, AppError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = *guard {
            return Err(AppError::Session(format!(
                "Another job is already running (jobId={}, kind={:?})",
                existing.job_id, existing.kind
            )));
        }
        let job = ActiveJob {
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        *guard = Some(job);
        Ok(job)
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if let Some(active) = *guard
            && active.job_id == job_id
        {
            *guard = None;
        }
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginParams {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadParams {
    session_id: String,
    input_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeParams {
    session_id: String,
    video_volume: f64,
    audio_volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportParams {
    session_id: String,
    output_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
    },
    MergeCommand(MergeCommandPreviewParams),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NarrationParams {
    session_id: String,
    instructions: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechParams {
    session_id: String,
    text: Option<String>,
    #[serde(default)]
    voice: VoiceName,
    #[serde(default = "default_speed")]
    speed: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeParams {
    session_id: String,
    video_volume: Option<f64>,
    audio_volume: Option<f64>,
}

fn default_speed() -> f32 {
    1.0
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn emit_job_progress(writer: &SharedWriter, job: ActiveJob, payload: FfmpegProgressPayload) {
    emit_rpc_event(
        writer,
        "media.job.progress",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
            "progress": payload.progress,
            "step": payload.step,
        }),
    );
}

fn emit_job_error(writer: &SharedWriter, job: ActiveJob, error: &RpcErrorPayload) {
    emit_rpc_event(
        writer,
        "media.job.error",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
            "summary": error.summary,
            "detail": error.detail,
        }),
    );
}

fn emit_job_complete(writer: &SharedWriter, job: ActiveJob) {
    emit_rpc_event(
        writer,
        "media.job.complete",
        json!({
            "jobId": job.job_id,
            "kind": job.kind,
        }),
    );
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err.ffmpeg_diagnostic() {
        Some((-1, stderr)) => RpcErrorPayload {
            summary: stderr.to_string(),
            detail: stderr.to_string(),
        },
        Some((code, stderr)) => {
            let parsed = voxover_core::ffmpeg::parse_ffmpeg_error(stderr, Some(code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        None => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidParameter(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Session(format!("Failed to serialize {}: {}", what, e)))
}

fn dispatch_sync(method: &str, params: Value, studio: &Studio) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_value(studio.capabilities(), "app capabilities"),
        "auth.login" => {
            let parsed: LoginParams = params_from_value(params)?;
            to_value(&*studio.login(&parsed.username, &parsed.password)?, "session")
        }
        "auth.logout" => {
            let parsed: SessionParams = params_from_value(params)?;
            studio.logout(&parsed.session_id)?;
            Ok(json!({ "loggedOut": true }))
        }
        "session.state" => {
            let parsed: SessionParams = params_from_value(params)?;
            to_value(&*studio.state(&parsed.session_id)?, "session")
        }
        "session.upload" => {
            let parsed: UploadParams = params_from_value(params)?;
            to_value(&*studio.upload(&parsed.session_id, &parsed.input_path)?, "session")
        }
        "session.reset" => {
            let parsed: SessionParams = params_from_value(params)?;
            to_value(&*studio.reset(&parsed.session_id)?, "session")
        }
        "session.setVolumes" => {
            let parsed: VolumeParams = params_from_value(params)?;
            to_value(
                &*studio.set_volumes(&parsed.session_id, parsed.video_volume, parsed.audio_volume)?,
                "session",
            )
        }
        "session.export" => {
            let parsed: ExportParams = params_from_value(params)?;
            let saved = studio.export(&parsed.session_id, &parsed.output_path)?;
            Ok(json!({ "savedPath": saved.to_string_lossy() }))
        }
        "media.inspect" => {
            let parsed: MediaInspectParams = params_from_value(params)?;
            match parsed {
                MediaInspectParams::Metadata { input_path } => to_value(
                    sidecar_api::get_media_metadata_result(input_path)?,
                    "metadata",
                ),
                MediaInspectParams::MergeCommand(preview) => to_value(
                    sidecar_api::preview_merge_commands(&preview)?,
                    "merge command",
                ),
            }
        }
        _ => Err(AppError::InvalidParameter(format!("Unknown method: {}", method))),
    }
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let response = match result {
        Ok(result) => serde_json::to_value(RpcSuccess { id, result })
            .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
        Err(err) => serde_json::to_value(RpcFailure {
            id,
            error: parse_error_payload(&err),
        })
        .map_err(|e| io::Error::other(format!("serialize failure: {}", e))),
    };

    match response {
        Ok(value) => {
            let _ = write_json_line_shared(writer, &value);
        }
        Err(err) => {
            let failure = RpcFailure {
                id,
                error: RpcErrorPayload {
                    summary: "Serialization error".to_string(),
                    detail: err.to_string(),
                },
            };
            let _ = write_json_line_shared(writer, &failure);
        }
    }
}

fn run_job(
    kind: JobKind,
    params: Value,
    studio: &Studio,
    emitter: sidecar_api::SidecarProgressEmitter,
) -> Result<Value, AppError> {
    let state = match kind {
        JobKind::Narration => {
            let parsed: NarrationParams = params_from_value(params)?;
            studio.generate_script(&parsed.session_id, &parsed.instructions, Some(emitter))?
        }
        JobKind::Speech => {
            let parsed: SpeechParams = params_from_value(params)?;
            let settings = SpeechSettings::new(parsed.voice, parsed.speed)?;
            studio.synthesize(&parsed.session_id, parsed.text, settings, Some(emitter))?
        }
        JobKind::Merge => {
            let parsed: MergeParams = params_from_value(params)?;
            studio.merge(
                &parsed.session_id,
                parsed.video_volume,
                parsed.audio_volume,
                Some(emitter),
            )?
        }
    };
    to_value(&*state, "session")
}

fn handle_job_request(
    request: RpcRequest,
    kind: JobKind,
    writer: &SharedWriter,
    jobs: &JobState,
    studio: &Studio,
) {
    let active_job = match jobs.begin_job(kind) {
        Ok(job) => job,
        Err(err) => {
            respond(writer, request.id, Err(err));
            return;
        }
    };
    let _job_guard = ActiveJobGuard {
        state: jobs.clone(),
        job_id: active_job.job_id,
    };

    let writer_for_events = Arc::clone(writer);
    let emitter: sidecar_api::SidecarProgressEmitter =
        Arc::new(move |payload| emit_job_progress(&writer_for_events, active_job, payload));

    let result = run_job(kind, request.params, studio, emitter).map(|mut value| {
        if let Value::Object(map) = &mut value {
            map.insert("jobId".to_string(), json!(active_job.job_id));
        }
        value
    });
    match &result {
        Ok(_) => emit_job_complete(writer, active_job),
        Err(err) => emit_job_error(writer, active_job, &parse_error_payload(err)),
    }
    respond(writer, request.id, result);
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("invalid configuration: {}", err);
            let failure = RpcFailure {
                id: 0,
                error: parse_error_payload(&err),
            };
            let _ = write_json_line_shared(&stdout, &failure);
            return Err(io::Error::other(err.to_string()));
        }
    };
    let studio = Arc::new(Studio::from_config(config));
    studio.cleanup_startup(Duration::from_secs(STARTUP_CLEANUP_MAX_AGE_HOURS * 3600));

    let stdin = io::stdin();
    let jobs = JobState::new();
    let mut job_workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };
        log::debug!("request {}: {}", request.id, request.method);

        if let Some(kind) = JobKind::from_method(&request.method) {
            let writer = Arc::clone(&stdout);
            let job_state = jobs.clone();
            let studio = Arc::clone(&studio);
            let worker = thread::spawn(move || {
                handle_job_request(request, kind, &writer, &job_state, &studio);
            });
            job_workers.retain(|w| !w.is_finished());
            job_workers.push(worker);
        } else {
            let id = request.id;
            let result = dispatch_sync(&request.method, request.params, &studio);
            respond(&stdout, id, result);
        }
    }

    for worker in job_workers {
        let _ = worker.join();
    }

    studio.cleanup_on_exit();
    Ok(())
}

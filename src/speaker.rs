//! Speaker: text-to-speech into a narration audio file.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateSpeechRequestArgs, SpeechModel, Voice};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::openai::{block_on_async, client_from_config, with_timeout};

const TARGET: &str = "voxover::speaker";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceName {
    Alloy,
    Echo,
    Fable,
    Onyx,
    #[default]
    Nova,
    Shimmer,
}

impl VoiceName {
    pub const ALL: [VoiceName; 6] = [
        VoiceName::Alloy,
        VoiceName::Echo,
        VoiceName::Fable,
        VoiceName::Onyx,
        VoiceName::Nova,
        VoiceName::Shimmer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VoiceName::Alloy => "alloy",
            VoiceName::Echo => "echo",
            VoiceName::Fable => "fable",
            VoiceName::Onyx => "onyx",
            VoiceName::Nova => "nova",
            VoiceName::Shimmer => "shimmer",
        }
    }

    fn to_api(self) -> Voice {
        match self {
            VoiceName::Alloy => Voice::Alloy,
            VoiceName::Echo => Voice::Echo,
            VoiceName::Fable => Voice::Fable,
            VoiceName::Onyx => Voice::Onyx,
            VoiceName::Nova => Voice::Nova,
            VoiceName::Shimmer => Voice::Shimmer,
        }
    }
}

impl FromStr for VoiceName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| AppError::InvalidParameter(format!("Unknown voice: {}", s)))
    }
}

/// Voice and speaking rate for one synthesis call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechSettings {
    voice: VoiceName,
    speed: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            voice: VoiceName::Nova,
            speed: 1.0,
        }
    }
}

impl SpeechSettings {
    pub fn new(voice: VoiceName, speed: f32) -> Result<Self, AppError> {
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(AppError::InvalidParameter(format!(
                "speed must be between {} and {}, got {}",
                MIN_SPEED, MAX_SPEED, speed
            )));
        }
        Ok(Self { voice, speed })
    }

    pub fn voice(&self) -> VoiceName {
        self.voice
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }
}

pub trait Speaker: Send + Sync {
    /// Write speech for `text` to `output`. On success the file is complete
    /// and non-empty; on failure nothing is left at `output`.
    fn synthesize(&self, text: &str, settings: SpeechSettings, output: &Path) -> Result<(), AppError>;
}

fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "speech".to_string());
    output.with_file_name(format!(".{}.partial", name))
}

/// Write `bytes` next to `output` and rename into place, so readers never see
/// a half-written file.
pub fn write_audio_atomically(output: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if bytes.is_empty() {
        return Err(AppError::service("speaker", "received empty audio"));
    }
    let partial = partial_path(output);
    let result = fs::write(&partial, bytes).and_then(|()| fs::rename(&partial, output));
    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e.into());
    }
    Ok(())
}

pub struct OpenAiSpeaker {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiSpeaker {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: client_from_config(config)?,
            model: config.speech_model.clone(),
        })
    }

    fn speech_model(&self) -> SpeechModel {
        match self.model.as_str() {
            "tts-1" => SpeechModel::Tts1,
            "tts-1-hd" => SpeechModel::Tts1Hd,
            other => SpeechModel::Other(other.to_string()),
        }
    }
}

impl Speaker for OpenAiSpeaker {
    fn synthesize(&self, text: &str, settings: SpeechSettings, output: &Path) -> Result<(), AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidParameter("Narration text is empty".into()));
        }
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .voice(settings.voice().to_api())
            .model(self.speech_model())
            .speed(settings.speed())
            .build()
            .map_err(|e| AppError::service("speaker", e))?;

        log::info!(
            target: TARGET,
            "synthesizing {} chars: model={}, voice={}, speed={}",
            text.chars().count(),
            self.model,
            settings.voice().as_str(),
            settings.speed()
        );
        let response = block_on_async(with_timeout(
            "speaker",
            REQUEST_TIMEOUT,
            self.client.audio().speech(request),
        ))?;
        write_audio_atomically(output, &response.bytes)?;
        log::info!(
            target: TARGET,
            "wrote {} ({} bytes)",
            output.display(),
            response.bytes.len()
        );
        Ok(())
    }
}

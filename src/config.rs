//! Environment-driven configuration, read once at start-up.

use std::path::PathBuf;

use crate::error::AppError;

pub const DEFAULT_NARRATION_MODEL: &str = "gpt-4o";
pub const DEFAULT_SPEECH_MODEL: &str = "tts-1";
pub const DEFAULT_FRAME_COUNT: u32 = 8;
const MAX_FRAME_COUNT: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub narration_model: String,
    pub speech_model: String,
    pub frame_count: u32,
    pub work_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            openai_api_key: None,
            openai_base_url: None,
            narration_model: DEFAULT_NARRATION_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            frame_count: DEFAULT_FRAME_COUNT,
            work_dir: std::env::temp_dir(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let frame_count = match get("VOXOVER_FRAME_COUNT") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| (1..=MAX_FRAME_COUNT).contains(n))
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "VOXOVER_FRAME_COUNT must be between 1 and {}, got {:?}",
                        MAX_FRAME_COUNT, raw
                    ))
                })?,
            None => defaults.frame_count,
        };

        let config = Self {
            username: get("APP_USERNAME").or_else(|| get("USERNAME")),
            password: get("APP_PASSWORD").or_else(|| get("PASSWORD")),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            narration_model: get("VOXOVER_NARRATION_MODEL").unwrap_or(defaults.narration_model),
            speech_model: get("VOXOVER_SPEECH_MODEL").unwrap_or(defaults.speech_model),
            frame_count,
            work_dir: get("VOXOVER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        };
        log::debug!(
            target: "voxover::config",
            "config: narration_model={}, speech_model={}, frame_count={}, work_dir={}, api_key_set={}, credentials_set={}",
            config.narration_model,
            config.speech_model,
            config.frame_count,
            config.work_dir.display(),
            config.openai_api_key.is_some(),
            config.username.is_some() && config.password.is_some()
        );
        Ok(config)
    }

    /// The API key, or a config error naming the variable.
    pub fn require_api_key(&self) -> Result<&str, AppError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY is not set".into()))
    }
}

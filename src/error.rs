//! App error type for sidecar commands. Implements Display and Serialize for the frontend.

use std::path::PathBuf;

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Input file is missing or empty: {}", .0.display())]
    MissingInputFile(PathBuf),

    #[error("{name} must be a linear gain between 0.0 and 1.0, got {value}")]
    InvalidVolumeParameter { name: &'static str, value: f64 },

    /// Recoverable: the orchestrator escalates to the next strategy.
    #[error("Primary merge failed: {0}")]
    PrimaryMergeFailure(String),

    #[error("Fallback merge failed (code {code}): {stderr}")]
    FallbackMergeFailure {
        code: i32,
        stderr: String,
        primary: String,
    },

    #[error("Merged output is missing or empty: {}", .0.display())]
    OutputVerificationFailure(PathBuf),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("Invalid username or password")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{service} request failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    #[error("{0}")]
    Session(String),
}

impl AppError {
    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn service(service: &'static str, message: impl ToString) -> Self {
        Self::Service {
            service,
            message: message.to_string(),
        }
    }

    /// FFmpeg exit code and diagnostic text, when the error came from an FFmpeg run.
    pub fn ffmpeg_diagnostic(&self) -> Option<(i32, &str)> {
        match self {
            AppError::FfmpegFailed { code, stderr }
            | AppError::FallbackMergeFailure { code, stderr, .. } => Some((*code, stderr)),
            _ => None,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.ffmpeg_diagnostic() {
            Some((code, stderr)) => {
                let payload = parse_ffmpeg_error(stderr, Some(code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            None => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::FfmpegFailed {
            code: -1,
            stderr: s,
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

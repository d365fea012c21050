//! File validity checks around a merge: inputs must be present and non-empty
//! before anything runs, outputs must exist with non-zero size after every attempt.

use std::fs;
use std::path::Path;
#[cfg(any(test, feature = "integration-test-api"))]
use std::process::Command;

use crate::error::AppError;

fn non_empty_file_len(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .filter(|&len| len > 0)
}

/// Ok if `path` is an existing, non-empty regular file; `MissingInputFile` otherwise.
pub fn ensure_input_file(path: &Path) -> Result<(), AppError> {
    non_empty_file_len(path)
        .map(|_| ())
        .ok_or_else(|| AppError::MissingInputFile(path.to_path_buf()))
}

/// Size of a merged output, or `OutputVerificationFailure` if missing or empty.
pub fn verify_output(path: &Path) -> Result<u64, AppError> {
    non_empty_file_len(path).ok_or_else(|| AppError::OutputVerificationFailure(path.to_path_buf()))
}

/// Decode the whole file to null; a corrupt output makes FFmpeg report errors.
#[cfg(any(test, feature = "integration-test-api"))]
pub fn verify_decodes(path: &Path) -> Result<(), String> {
    let ffmpeg = super::discovery::get_ffmpeg_path().map_err(|e| e.to_string())?;
    let output = Command::new(ffmpeg)
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-f", "null", "-"])
        .output()
        .map_err(|e| e.to_string())?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() && !stderr.to_lowercase().contains("error") {
        Ok(())
    } else {
        Err(format!(
            "Decode verification failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ))
    }
}

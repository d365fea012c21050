//! Locate the ffmpeg and ffprobe binaries.
//!
//! Order: `FFMPEG_PATH` env override, common install locations, then `PATH`.
//! The ffmpeg result is cached for the process lifetime.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::AppError;

const TARGET: &str = "voxover::ffmpeg::discovery";

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

#[cfg(target_os = "windows")]
const LOOKUP_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_COMMAND: &str = "which";

fn binary_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn find_in_path(base: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_COMMAND).arg(base).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    (!first.is_empty()).then(|| PathBuf::from(first))
}

fn common_dirs() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/local/bin"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

fn env_override(var: &str) -> Option<PathBuf> {
    let value = std::env::var(var).ok()?;
    let path = PathBuf::from(value.trim());
    if path.exists() {
        log::debug!(target: TARGET, "Using {} from {} env", path.display(), var);
        Some(path)
    } else {
        log::warn!(
            target: TARGET,
            "{} points to a missing file ({}); falling back to discovery",
            var,
            path.display()
        );
        None
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    if let Some(path) = env_override("FFMPEG_PATH") {
        return Ok(path);
    }

    let name = binary_name("ffmpeg");
    if let Some(path) = common_dirs()
        .into_iter()
        .map(|dir| dir.join(&name))
        .find(|p| p.exists())
    {
        log::debug!(target: TARGET, "FFmpeg found in common path: {}", path.display());
        return Ok(path);
    }

    if let Some(path) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(target: TARGET, "FFmpeg found in PATH: {}", path.display());
        return Ok(path);
    }

    log::error!(target: TARGET, "FFmpeg not found in PATH or common locations");
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Install it or set FFMPEG_PATH:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Get the FFmpeg path, resolving it on first use.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let resolved = resolve_ffmpeg_path()?;
    // A concurrent caller may have won the race; either value is valid.
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| resolved).as_path())
}

/// ffprobe candidates next to an ffmpeg binary. A suffixed ffmpeg
/// (`ffmpeg-x86_64-unknown-linux`) looks for the same suffix first.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(binary_name(&format!("ffprobe{suffix}"))));
    }
    candidates.push(parent.join(binary_name("ffprobe")));
    candidates
}

/// Get the ffprobe path: `FFPROBE_PATH`, then a sibling of ffmpeg, then `PATH`.
pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    if let Some(path) = env_override("FFPROBE_PATH") {
        return Ok(path);
    }
    let ffmpeg = get_ffmpeg_path()?;
    if let Some(path) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(path);
    }
    find_in_path("ffprobe")
        .filter(|p| p.exists())
        .ok_or_else(|| {
            AppError::FfmpegNotFound(format!(
                "ffprobe not found next to {} or in PATH",
                ffmpeg.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_plain_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/usr/bin/ffmpeg"));
        assert_eq!(candidates, vec![PathBuf::from("/usr/bin/ffprobe")]);
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_suffixed_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/opt/bin/ffmpeg-x86_64-unknown-linux"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/bin/ffprobe-x86_64-unknown-linux"),
                PathBuf::from("/opt/bin/ffprobe"),
            ]
        );
    }

    #[test]
    fn ffprobe_candidates_without_parent_is_empty() {
        assert!(ffprobe_candidates(Path::new("")).is_empty());
    }

    /// Restore an env var to its previous value when dropped.
    struct RestoreEnv {
        key: &'static str,
        previous: Option<String>,
    }

    impl RestoreEnv {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            unsafe { std::env::set_var(key, value) };
            Self { key, previous }
        }
    }

    impl Drop for RestoreEnv {
        fn drop(&mut self) {
            match &self.previous {
                Some(v) => unsafe { std::env::set_var(self.key, v) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }

    #[test]
    #[serial]
    fn ffprobe_env_override_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = dir.path().join(binary_name("ffprobe"));
        std::fs::write(&probe, b"").expect("write fake ffprobe");
        let _env = RestoreEnv::set("FFPROBE_PATH", &probe.to_string_lossy());
        assert_eq!(get_ffprobe_path().expect("override"), probe);
    }

    #[test]
    #[serial]
    fn missing_override_is_ignored() {
        let _env = RestoreEnv::set("FFPROBE_PATH", "/definitely/not/here/ffprobe");
        assert!(env_override("FFPROBE_PATH").is_none());
    }
}

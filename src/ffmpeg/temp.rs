//! Session workspaces: one directory per session holding uploads, narration
//! audio, backups and merged outputs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const WORKSPACE_PREFIX: &str = "voxover-";

const TARGET: &str = "voxover::ffmpeg::temp";

/// Short suffix for unique names. Not cryptographically secure; uniqueness only.
fn unique_suffix(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut state = COUNTER.fetch_add(1, Ordering::Relaxed)
        ^ u64::from(std::process::id()).rotate_left(32)
        ^ now_millis().rotate_left(16);
    let mut s = String::with_capacity(len);
    for _ in 0..len {
        // xorshift step
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        s.push(CHARS[(state % CHARS.len() as u64) as usize] as char);
    }
    s
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace directory under `parent`.
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        fs::create_dir_all(parent)?;
        loop {
            let root = parent.join(format!(
                "{}{}-{}",
                WORKSPACE_PREFIX,
                now_millis(),
                unique_suffix(9)
            ));
            match fs::create_dir(&root) {
                Ok(()) => {
                    log::debug!(target: TARGET, "created workspace {}", root.display());
                    return Ok(Self { root });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Delete every file in the workspace, keeping the directory.
    pub fn clear(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!(target: TARGET, "failed to delete {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    /// Delete the workspace and everything in it.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Remove workspaces under `parent` older than `max_age` (left over from a crash).
/// Returns the number removed.
pub fn cleanup_old_workspaces(parent: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(parent) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_workspace = path.is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX));
        if !is_workspace {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age > max_age && fs::remove_dir_all(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!(target: TARGET, "removed {} stale workspace(s)", removed);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_paths_live_under_root() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create_in(parent.path()).expect("workspace");
        assert_eq!(ws.path("voiceover.mp3").parent(), Some(ws.root()));
    }

    #[test]
    fn workspaces_are_distinct() {
        let parent = tempfile::tempdir().expect("tempdir");
        let a = Workspace::create_in(parent.path()).expect("workspace a");
        let b = Workspace::create_in(parent.path()).expect("workspace b");
        assert_ne!(a.root(), b.root());
        assert!(a.root().is_dir());
        assert!(
            a.root()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX))
        );
    }

    #[test]
    fn clear_keeps_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create_in(parent.path()).expect("workspace");
        fs::write(ws.path("a.mp3"), b"a").expect("write");
        ws.clear().expect("clear");
        assert!(ws.root().is_dir());
        assert_eq!(fs::read_dir(ws.root()).expect("read_dir").count(), 0);
        ws.remove().expect("remove");
        assert!(!ws.root().exists());
        ws.remove().expect("second remove is a no-op");
    }

    #[test]
    fn cleanup_skips_fresh_and_foreign_dirs() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create_in(parent.path()).expect("workspace");
        fs::create_dir(parent.path().join("unrelated")).expect("mkdir");
        assert_eq!(cleanup_old_workspaces(parent.path(), Duration::from_secs(3600)), 0);
        assert!(ws.root().exists());
        cleanup_old_workspaces(parent.path(), Duration::ZERO);
        assert!(parent.path().join("unrelated").exists());
    }
}

//! Studio session snapshots.
//!
//! A `SessionState` is never mutated in place: every action derives a new
//! snapshot from the previous one, and the studio swaps it in.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const DEFAULT_VIDEO_VOLUME: f64 = 0.3;
pub const DEFAULT_AUDIO_VOLUME: f64 = 1.0;
pub const UPLOAD_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "wmv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    UploadVideo,
    AnalyzeVideo,
    EditScript,
    GenerateAudio,
    PreviewAudio,
    SetVolumes,
    MergeMedia,
    Download,
}

impl Step {
    pub const COUNT: u8 = 8;

    /// 1-based position in the workflow.
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::UploadVideo => "Upload Video",
            Step::AnalyzeVideo => "Analyze Video",
            Step::EditScript => "Edit Script",
            Step::GenerateAudio => "Generate Audio",
            Step::PreviewAudio => "Preview Audio",
            Step::SetVolumes => "Set Volumes",
            Step::MergeMedia => "Merge Media",
            Step::Download => "Download",
        }
    }

    pub fn progress(self) -> f64 {
        f64::from(self.number()) / f64::from(Self::COUNT)
    }
}

/// Random id used in artifact file names; changes on every reset.
pub fn new_unique_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub unique_id: String,
    pub step: Step,
    pub uploaded_video: Option<PathBuf>,
    pub original_name: Option<String>,
    pub script: Option<String>,
    pub narration_audio: Option<PathBuf>,
    pub video_volume: f64,
    pub audio_volume: f64,
    pub merged_video: Option<PathBuf>,
    pub merge_count: u32,
    pub processing_complete: bool,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn opened(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            unique_id: new_unique_id(),
            step: Step::UploadVideo,
            uploaded_video: None,
            original_name: None,
            script: None,
            narration_audio: None,
            video_volume: DEFAULT_VIDEO_VOLUME,
            audio_volume: DEFAULT_AUDIO_VOLUME,
            merged_video: None,
            merge_count: 0,
            processing_complete: false,
            last_error: None,
        }
    }

    /// Same session, fresh artifacts and a new unique id.
    pub fn reset(&self) -> Self {
        Self::opened(self.session_id.clone())
    }

    pub fn uploaded_name(&self, ext: &str) -> String {
        format!("uploaded_{}.{}", self.unique_id, ext)
    }

    pub fn narration_name(&self) -> String {
        format!("voiceover_{}.mp3", self.unique_id)
    }

    /// Each merge gets its own file so a finished output is never overwritten.
    pub fn merged_name(&self) -> String {
        format!("merged_{}-{}.mp4", self.unique_id, self.merge_count + 1)
    }

    /// Suggested file name for the final download.
    pub fn download_name(&self) -> String {
        let stem = self
            .original_name
            .as_deref()
            .and_then(|n| Path::new(n).file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        format!("VoxOver_{}_{}.mp4", stem, self.unique_id)
    }

    pub fn with_upload(&self, stored: PathBuf, original_name: String) -> Self {
        Self {
            uploaded_video: Some(stored),
            original_name: Some(original_name),
            step: Step::AnalyzeVideo,
            last_error: None,
            ..self.clone()
        }
    }

    pub fn analyzing(&self) -> Self {
        Self {
            step: Step::AnalyzeVideo,
            last_error: None,
            ..self.clone()
        }
    }

    pub fn with_script(&self, script: String) -> Self {
        Self {
            script: Some(script),
            step: Step::EditScript,
            last_error: None,
            ..self.clone()
        }
    }

    pub fn synthesizing(&self) -> Self {
        Self {
            step: Step::GenerateAudio,
            last_error: None,
            ..self.clone()
        }
    }

    /// `text` is the script as edited by the user; it replaces the stored one.
    pub fn with_narration(&self, audio: PathBuf, text: String) -> Self {
        Self {
            narration_audio: Some(audio),
            script: Some(text),
            step: Step::PreviewAudio,
            last_error: None,
            ..self.clone()
        }
    }

    pub fn with_volumes(&self, video_volume: f64, audio_volume: f64) -> Self {
        Self {
            video_volume,
            audio_volume,
            step: Step::SetVolumes,
            last_error: None,
            ..self.clone()
        }
    }

    pub fn merging(&self) -> Self {
        Self {
            step: Step::MergeMedia,
            processing_complete: false,
            last_error: None,
            ..self.clone()
        }
    }

    pub fn with_merged(&self, output: PathBuf) -> Self {
        Self {
            merged_video: Some(output),
            merge_count: self.merge_count + 1,
            step: Step::Download,
            processing_complete: true,
            last_error: None,
            ..self.clone()
        }
    }

    /// Keep the step where it stopped and record why.
    pub fn failed(&self, message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_numbered_one_to_eight() {
        assert_eq!(Step::UploadVideo.number(), 1);
        assert_eq!(Step::Download.number(), 8);
        assert_eq!(Step::MergeMedia.label(), "Merge Media");
        assert_eq!(Step::Download.progress(), 1.0);
    }

    #[test]
    fn happy_path_transitions() {
        let s0 = SessionState::opened("s1");
        assert_eq!(s0.step, Step::UploadVideo);
        assert_eq!((s0.video_volume, s0.audio_volume), (0.3, 1.0));

        let s1 = s0.with_upload(PathBuf::from("/w/uploaded.mp4"), "holiday.mov".into());
        let s2 = s1.analyzing().with_script("Hello there".into());
        assert_eq!(s2.step, Step::EditScript);
        let s3 = s2
            .synthesizing()
            .with_narration(PathBuf::from("/w/voiceover.mp3"), "Hello, edited".into());
        assert_eq!(s3.step, Step::PreviewAudio);
        assert_eq!(s3.script.as_deref(), Some("Hello, edited"));
        let s4 = s3.with_volumes(0.5, 0.8).merging();
        assert_eq!(s4.step, Step::MergeMedia);
        let s5 = s4.with_merged(PathBuf::from("/w/merged.mp4"));
        assert_eq!(s5.step, Step::Download);
        assert!(s5.processing_complete);
        assert_eq!(s5.merge_count, 1);
        assert_eq!((s5.video_volume, s5.audio_volume), (0.5, 0.8));

        // earlier snapshots are untouched
        assert!(s0.uploaded_video.is_none());
        assert!(s3.merged_video.is_none());
    }

    #[test]
    fn failure_keeps_step_and_artifacts() {
        let s = SessionState::opened("s1")
            .with_upload(PathBuf::from("/w/u.mp4"), "u.mp4".into())
            .analyzing()
            .failed("narrator request failed");
        assert_eq!(s.step, Step::AnalyzeVideo);
        assert_eq!(s.last_error.as_deref(), Some("narrator request failed"));
        assert!(s.uploaded_video.is_some());
        assert!(s.synthesizing().last_error.is_none());
    }

    #[test]
    fn reset_issues_new_unique_id() {
        let s = SessionState::opened("s1").with_upload(PathBuf::from("/w/u.mp4"), "u.mp4".into());
        let r = s.reset();
        assert_eq!(r.session_id, "s1");
        assert_ne!(r.unique_id, s.unique_id);
        assert!(r.uploaded_video.is_none());
        assert_eq!(r.step, Step::UploadVideo);
    }

    #[test]
    fn unique_ids_are_random_v4_uuids() {
        let a = new_unique_id();
        let b = new_unique_id();
        assert_ne!(a, b);
        let parsed = Uuid::parse_str(&a).expect("uuid");
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn artifact_names() {
        let mut s = SessionState::opened("s1");
        s.unique_id = "abc".into();
        assert_eq!(s.uploaded_name("mov"), "uploaded_abc.mov");
        assert_eq!(s.narration_name(), "voiceover_abc.mp3");
        assert_eq!(s.merged_name(), "merged_abc-1.mp4");
        assert_eq!(s.download_name(), "VoxOver_video_abc.mp4");
        let s = s.with_upload(PathBuf::from("/w/u.mov"), "Beach Day.mov".into());
        assert_eq!(s.download_name(), "VoxOver_Beach Day_abc.mp4");
        assert_eq!(s.with_merged(PathBuf::from("/w/m.mp4")).merged_name(), "merged_abc-2.mp4");
    }
}

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use regex::Regex;
use voxover_core::ffmpeg::path_to_string;

/// Audio track of a generated source video.
#[derive(Clone, Copy, Debug)]
pub enum SourceAudio {
    Tone(u32),
    None,
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = voxover_core::ffmpeg::discovery::get_ffmpeg_path()
            .expect("FFmpeg not found")
            .to_path_buf();
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// H.264 test pattern, optionally with an AAC sine tone.
    pub fn with_test_video(&self, name: &str, duration_secs: f32, audio: SourceAudio) -> PathBuf {
        let output = self.path(name);
        let duration = format!("{}", duration_secs);
        let mut args: Vec<String> = vec![
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("testsrc=duration={}:size=320x240:rate=30", duration),
        ];
        if let SourceAudio::Tone(freq) = audio {
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!("sine=frequency={}:duration={}", freq, duration),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "1:a".into(),
                "-c:a".into(),
                "aac".into(),
            ]);
        }
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "ultrafast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            path_to_string(&output),
        ]);
        self.run(&args, "create test video");
        output
    }

    /// Narration stand-in: a sine tone as 16-bit WAV.
    pub fn with_narration(&self, name: &str, duration_secs: f32, freq: u32) -> PathBuf {
        let output = self.path(name);
        let args: Vec<String> = vec![
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("sine=frequency={}:duration={}", freq, duration_secs),
            "-c:a".into(),
            "pcm_s16le".into(),
            path_to_string(&output),
        ];
        self.run(&args, "create narration");
        output
    }

    fn run(&self, args: &[String], what: &str) {
        let status = Command::new(&self.ffmpeg)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap_or_else(|e| panic!("failed to {}: {}", what, e));
        assert!(status.success(), "ffmpeg failed to {}", what);
    }

    /// Mean level of the first audio stream, in dB (about -91 for digital silence).
    pub fn mean_volume_db(&self, path: &Path) -> f64 {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:a:0", "-af", "volumedetect", "-f", "null", "-"])
            .output()
            .expect("run volumedetect");
        let stderr = String::from_utf8_lossy(&output.stderr);
        let re = Regex::new(r"mean_volume:\s*(-?[0-9.]+|-inf) dB").expect("regex");
        let caps = re
            .captures(&stderr)
            .unwrap_or_else(|| panic!("no mean_volume in volumedetect output:\n{}", stderr));
        match &caps[1] {
            "-inf" => f64::NEG_INFINITY,
            value => value.parse().expect("mean_volume value"),
        }
    }

    /// `(size, md5)` of every packet of the first video stream, stream-copied.
    pub fn video_packet_hashes(&self, path: &Path) -> Vec<(String, String)> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-c", "copy", "-f", "framemd5", "-"])
            .output()
            .expect("run framemd5");
        assert!(output.status.success(), "framemd5 failed");
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let cols: Vec<&str> = line.split(',').map(str::trim).collect();
                (cols.len() >= 6).then(|| (cols[4].to_string(), cols[5].to_string()))
            })
            .collect()
    }
}

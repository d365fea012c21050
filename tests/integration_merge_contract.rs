#![cfg(feature = "integration-test-api")]

mod support;

use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use support::{IntegrationEnv, SourceAudio};
use voxover_core::error::AppError;
use voxover_core::ffmpeg::{ProgressCallback, verify_decodes};
use voxover_core::merge::{MergeContext, MergeOrchestrator, MergeRequest, MergeStrategy};
use voxover_core::test_support::{media_metadata_for_test, probe_inputs_for_test, strategies_for_test};

const AUDIBLE_DB: f64 = -40.0;
const SILENT_DB: f64 = -80.0;
const LEVEL_TOLERANCE_DB: f64 = 1.0;

fn merge_default(env: &IntegrationEnv, source: &str, narration: &str, v: f64, a: f64) -> std::path::PathBuf {
    let request = MergeRequest::new(env.path(source), env.path(narration), env.path("merged.mp4"), v, a)
        .expect("valid request");
    MergeOrchestrator::default()
        .merge(&request, None)
        .expect("merge succeeds")
}

#[test]
fn ten_second_video_with_six_second_narration() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("source.mp4", 10.0, SourceAudio::Tone(440));
    let narration = env.with_narration("voice.wav", 6.0, 880);
    let output = env.path("merged.mp4");

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let callback: ProgressCallback = Arc::new(move |p: f64| sink.lock().push(p));
    let request = MergeRequest::new(&source, &narration, &output, 0.3, 1.0).expect("request");
    let merged = MergeOrchestrator::default()
        .merge(&request, Some(callback))
        .expect("merge");
    assert_eq!(merged, output);

    let meta = media_metadata_for_test(&merged).expect("probe merged");
    assert!(meta.size > 0);
    assert_eq!(meta.video_stream_count, 1);
    assert_eq!(meta.audio_stream_count, 1);
    assert!(
        (meta.duration - 6.0).abs() < 0.5,
        "expected ~6s output, got {}",
        meta.duration
    );
    assert_eq!(meta.video_codec_name.as_deref(), Some("h264"));
    verify_decodes(&merged).expect("merged output decodes");

    let source_packets = env.video_packet_hashes(&source);
    let merged_packets = env.video_packet_hashes(&merged);
    assert!(!merged_packets.is_empty());
    assert!(
        merged_packets.len() <= source_packets.len()
            && merged_packets[..] == source_packets[..merged_packets.len()],
        "video stream must be copied packet for packet"
    );

    let progress = progress.lock();
    assert!(!progress.is_empty(), "composite mix reports progress");
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn silent_source_takes_narration_as_whole_track() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("silent.mp4", 4.0, SourceAudio::None);
    let narration = env.with_narration("voice.wav", 3.0, 660);
    let inputs = probe_inputs_for_test(source.clone(), narration, env.path("x.mp4")).expect("probe");
    assert!(!inputs.source_has_audio);

    let merged = merge_default(&env, "silent.mp4", "voice.wav", 0.3, 1.0);
    let meta = media_metadata_for_test(&merged).expect("probe");
    assert_eq!(meta.audio_stream_count, 1);
    assert!(env.mean_volume_db(&merged) > AUDIBLE_DB);
}

#[test]
fn zero_gains_silence_their_side() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("source.mp4", 3.0, SourceAudio::Tone(440));
    let narration = env.with_narration("voice.wav", 3.0, 880);
    let source_level = env.mean_volume_db(&source);
    let narration_level = env.mean_volume_db(&narration);

    let both_muted = merge_default(&env, "source.mp4", "voice.wav", 0.0, 0.0);
    assert!(env.mean_volume_db(&both_muted) < SILENT_DB, "both gains 0 gives a silent track");

    // Two equal-level tones summed would read about 3 dB above either alone.
    let source_only = env.mean_volume_db(&merge_default(&env, "source.mp4", "voice.wav", 1.0, 0.0));
    assert!(
        (source_only - source_level).abs() < LEVEL_TOLERANCE_DB,
        "narration leaked into source-only mix: {} dB vs source {} dB",
        source_only,
        source_level
    );

    let narration_only = env.mean_volume_db(&merge_default(&env, "source.mp4", "voice.wav", 0.0, 1.0));
    assert!(
        (narration_only - narration_level).abs() < LEVEL_TOLERANCE_DB,
        "source leaked into narration-only mix: {} dB vs narration {} dB",
        narration_only,
        narration_level
    );
}

#[test]
fn short_source_bounds_the_output_for_both_strategies() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("short.mp4", 3.0, SourceAudio::Tone(440));
    let narration = env.with_narration("long.wav", 5.0, 880);

    for name in ["composite_mix", "filter_graph_mix"] {
        let output = env.path(&format!("{}.mp4", name));
        let request = MergeRequest::new(&source, &narration, &output, 0.3, 1.0).expect("request");
        MergeOrchestrator::new(strategies_for_test(&[name]))
            .merge(&request, None)
            .unwrap_or_else(|e| panic!("{} failed: {}", name, e));
        let meta = media_metadata_for_test(&output).expect("probe");
        assert!(
            (meta.duration - 3.0).abs() < 0.5,
            "{}: expected ~3s output, got {}",
            name,
            meta.duration
        );
        verify_decodes(&output).expect("decodes");
    }
}

#[test]
fn filter_graph_strategy_alone_produces_output() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("source.mp4", 4.0, SourceAudio::Tone(440));
    let narration = env.with_narration("voice.wav", 2.0, 880);
    let output = env.path("fallback.mp4");
    let request = MergeRequest::new(&source, &narration, &output, 0.3, 1.0).expect("request");

    MergeOrchestrator::new(strategies_for_test(&["filter_graph_mix"]))
        .merge(&request, None)
        .expect("fallback merge");
    let meta = media_metadata_for_test(&output).expect("probe");
    assert!((meta.duration - 2.0).abs() < 0.5, "got {}", meta.duration);
    verify_decodes(&output).expect("decodes");
}

#[test]
fn filter_graph_strategy_handles_silent_source() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("silent.mp4", 3.0, SourceAudio::None);
    let narration = env.with_narration("voice.wav", 2.0, 880);
    let output = env.path("fallback.mp4");
    let request = MergeRequest::new(&source, &narration, &output, 0.3, 1.0).expect("request");

    MergeOrchestrator::new(strategies_for_test(&["filter_graph_mix"]))
        .merge(&request, None)
        .expect("fallback merge over silence");
    assert!(env.mean_volume_db(&output) > AUDIBLE_DB);
}

/// Fails after removing the narration file, like a primary that consumed it.
struct ConsumesNarration;

impl MergeStrategy for ConsumesNarration {
    fn name(&self) -> &'static str {
        "consumes_narration"
    }

    fn run(&self, ctx: &MergeContext<'_>) -> Result<(), AppError> {
        fs::remove_file(ctx.request.narration_audio())?;
        Err(AppError::ffmpeg_failed(1, "narration consumed"))
    }
}

#[test]
fn narration_deleted_before_fallback_is_restored() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("source.mp4", 3.0, SourceAudio::Tone(440));
    let narration = env.with_narration("voice.wav", 2.0, 880);
    let original = fs::read(&narration).expect("read narration");
    let output = env.path("merged.mp4");
    let request = MergeRequest::new(&source, &narration, &output, 0.3, 1.0).expect("request");

    let mut strategies: Vec<Box<dyn MergeStrategy>> = vec![Box::new(ConsumesNarration)];
    strategies.extend(strategies_for_test(&["filter_graph_mix"]));
    MergeOrchestrator::new(strategies)
        .merge(&request, None)
        .expect("fallback succeeds with restored narration");

    assert!(fs::metadata(&output).expect("output").len() > 0);
    assert_eq!(fs::read(&narration).expect("narration restored"), original);
}

#[test]
fn missing_narration_fails_without_output() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("source.mp4", 2.0, SourceAudio::Tone(440));
    let output = env.path("merged.mp4");
    let request =
        MergeRequest::new(&source, env.path("absent.wav"), &output, 0.3, 1.0).expect("request");

    let err = MergeOrchestrator::default()
        .merge(&request, None)
        .expect_err("missing narration");
    assert!(matches!(err, AppError::MissingInputFile(_)), "got {:?}", err);
    assert!(!output.exists());
}

#[test]
fn undecodable_narration_is_terminal_failure() {
    let env = IntegrationEnv::new();
    let source = env.with_test_video("source.mp4", 2.0, SourceAudio::Tone(440));
    let narration = env.path("garbage.wav");
    fs::write(&narration, b"this is not audio").expect("write garbage");
    let output = env.path("merged.mp4");
    let request = MergeRequest::new(&source, &narration, &output, 0.3, 1.0).expect("request");

    let err = MergeOrchestrator::default()
        .merge(&request, None)
        .expect_err("both strategies fail");
    match err {
        AppError::FallbackMergeFailure { code, stderr, primary } => {
            assert_ne!(code, 0);
            assert!(!stderr.is_empty());
            assert!(primary.contains("composite_mix"));
        }
        other => panic!("expected FallbackMergeFailure, got {:?}", other),
    }
    assert!(!output.exists(), "no output reported after terminal failure");
}

//! Narrator: turns a video plus style instructions into a narration script.
//!
//! The OpenAI implementation samples evenly spaced frames with FFmpeg and sends
//! them, with the instructions and a word budget sized to the video, in a
//! single vision chat request.

use std::fs;
use std::path::Path;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use base64::Engine;
use base64::prelude::BASE64_STANDARD;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::ffmpeg::ffprobe::get_media_metadata;
use crate::ffmpeg::{Workspace, build_frame_sample_args, ensure_input_file, path_to_string, run_ffmpeg_blocking};
use crate::openai::{block_on_async, client_from_config, with_timeout};

const TARGET: &str = "voxover::narrator";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const WORDS_PER_SECOND: f64 = 2.5;
const MIN_WORD_BUDGET: u32 = 10;
const MAX_COMPLETION_TOKENS: u32 = 1024;

const SYSTEM_PROMPT: &str = "You are a professional video narrator. You are shown frames sampled \
in order from a single video. Write a voiceover script that describes and explains what happens, \
following the user's style instructions. Return only the words to be spoken: no stage directions, \
no timestamps, no headings, no quotation marks.";

pub trait Narrator: Send + Sync {
    /// Produce narration text for `video`. `instructions` must be non-blank.
    fn describe_and_script(&self, video: &Path, instructions: &str) -> Result<String, AppError>;
}

/// Words that fit the video when spoken at a natural pace.
pub fn word_budget(duration_secs: f64) -> u32 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return MIN_WORD_BUDGET;
    }
    ((duration_secs * WORDS_PER_SECOND).round() as u32).max(MIN_WORD_BUDGET)
}

/// Midpoints of `count` equal slices of the video.
pub fn frame_timestamps(duration_secs: f64, count: u32) -> Vec<f64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || count == 0 {
        return vec![0.0];
    }
    let slice = duration_secs / f64::from(count);
    (0..count).map(|i| (f64::from(i) + 0.5) * slice).collect()
}

/// User-side text of the request.
pub fn narration_prompt(instructions: &str, duration_secs: f64, frame_count: usize) -> String {
    format!(
        "Instructions: {}\n\nThe video is {:.1} seconds long and you are seeing {} frames in order. \
         Keep the script to at most {} words so it fits the video when read aloud.",
        instructions.trim(),
        duration_secs.max(0.0),
        frame_count,
        word_budget(duration_secs)
    )
}

fn build_request(
    model: &str,
    prompt: &str,
    frames: Vec<String>,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let images = frames
        .into_iter()
        .map(|frame| -> Result<_, OpenAIError> {
            Ok(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(ImageUrlArgs::default().url(frame).build()?)
                    .build()?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let text = ChatCompletionRequestUserMessageContentPart::Text(
        ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(prompt)
            .build()?,
    );

    CreateChatCompletionRequestArgs::default()
        .model(model)
        .max_tokens(MAX_COMPLETION_TOKENS)
        .messages([
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        [vec![text], images].concat(),
                    ))
                    .build()?,
            ),
        ])
        .build()
}

pub struct OpenAiNarrator {
    client: Client<OpenAIConfig>,
    model: String,
    frame_count: u32,
    work_dir: std::path::PathBuf,
}

impl OpenAiNarrator {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: client_from_config(config)?,
            model: config.narration_model.clone(),
            frame_count: config.frame_count,
            work_dir: config.work_dir.clone(),
        })
    }

    /// JPEG data URLs for evenly spaced frames. Frames FFmpeg cannot grab
    /// (e.g. past the last keyframe) are skipped; none at all is an error.
    fn sample_frames(&self, video: &Path, duration_secs: f64) -> Result<Vec<String>, AppError> {
        let scratch = Workspace::create_in(&self.work_dir)?;
        let input = path_to_string(video);
        let mut frames = Vec::new();
        for (idx, at) in frame_timestamps(duration_secs, self.frame_count).into_iter().enumerate() {
            let frame_path = scratch.path(&format!("frame-{:02}.jpg", idx));
            let args = build_frame_sample_args(&input, at, &path_to_string(&frame_path));
            match run_ffmpeg_blocking(args, None, None).and_then(|()| Ok(fs::read(&frame_path)?)) {
                Ok(jpeg) if !jpeg.is_empty() => {
                    frames.push(format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(jpeg)));
                }
                Ok(_) => log::warn!(target: TARGET, "empty frame at {:.2}s", at),
                Err(e) => log::warn!(target: TARGET, "could not sample frame at {:.2}s: {}", at, e),
            }
        }
        if let Err(e) = scratch.remove() {
            log::warn!(target: TARGET, "failed to remove frame scratch dir: {}", e);
        }
        if frames.is_empty() {
            return Err(AppError::service("narrator", "no frames could be extracted from the video"));
        }
        Ok(frames)
    }
}

impl Narrator for OpenAiNarrator {
    fn describe_and_script(&self, video: &Path, instructions: &str) -> Result<String, AppError> {
        if instructions.trim().is_empty() {
            return Err(AppError::InvalidParameter(
                "Please provide instructions for the voiceover style and content.".into(),
            ));
        }
        ensure_input_file(video)?;
        let meta = get_media_metadata(video)?;
        if !meta.has_video() {
            return Err(AppError::InvalidParameter(format!(
                "{} has no video stream",
                video.display()
            )));
        }
        let duration = meta.duration;
        let frames = self.sample_frames(video, duration)?;
        log::info!(
            target: TARGET,
            "requesting narration: model={}, frames={}, duration={:.1}s, budget={} words",
            self.model,
            frames.len(),
            duration,
            word_budget(duration)
        );
        let prompt = narration_prompt(instructions, duration, frames.len());
        let request = build_request(&self.model, &prompt, frames)
            .map_err(|e| AppError::service("narrator", e))?;

        let response = block_on_async(with_timeout(
            "narrator",
            REQUEST_TIMEOUT,
            self.client.chat().create(request),
        ))?;
        let script = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AppError::service("narrator", "no content in response"))?;
        log::info!(target: TARGET, "narration script: {} words", script.split_whitespace().count());
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_scales_with_duration() {
        assert_eq!(word_budget(10.0), 25);
        assert_eq!(word_budget(60.0), 150);
        assert_eq!(word_budget(1.0), MIN_WORD_BUDGET);
        assert_eq!(word_budget(0.0), MIN_WORD_BUDGET);
        assert_eq!(word_budget(f64::NAN), MIN_WORD_BUDGET);
    }

    #[test]
    fn timestamps_are_slice_midpoints() {
        assert_eq!(frame_timestamps(8.0, 4), vec![1.0, 3.0, 5.0, 7.0]);
        assert_eq!(frame_timestamps(0.0, 8), vec![0.0]);
        let ts = frame_timestamps(10.0, 8);
        assert_eq!(ts.len(), 8);
        assert!(ts.iter().all(|&t| t > 0.0 && t < 10.0));
    }

    #[test]
    fn prompt_carries_instructions_and_budget() {
        let prompt = narration_prompt("  upbeat, for a product demo ", 12.0, 8);
        assert!(prompt.starts_with("Instructions: upbeat, for a product demo\n"));
        assert!(prompt.contains("12.0 seconds"));
        assert!(prompt.contains("8 frames"));
        assert!(prompt.contains("at most 30 words"));
    }

    #[test]
    fn request_has_system_prompt_then_text_and_images() {
        let request = build_request(
            "gpt-4o",
            "describe",
            vec!["data:image/jpeg;base64,AAAA".into(), "data:image/jpeg;base64,BBBB".into()],
        )
        .expect("request");
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages.len(), 2);
        assert!(matches!(request.messages[0], ChatCompletionRequestMessage::System(_)));
        match &request.messages[1] {
            ChatCompletionRequestMessage::User(user) => match &user.content {
                ChatCompletionRequestUserMessageContent::Array(parts) => {
                    assert_eq!(parts.len(), 3);
                    assert!(matches!(parts[0], ChatCompletionRequestUserMessageContentPart::Text(_)));
                }
                _ => panic!("expected multi-part content"),
            },
            _ => panic!("expected user message"),
        }
    }

    #[test]
    fn blank_instructions_rejected_before_any_work() {
        let config = AppConfig {
            openai_api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let narrator = OpenAiNarrator::from_config(&config).expect("narrator");
        let err = narrator
            .describe_and_script(Path::new("/does/not/exist.mp4"), "   ")
            .expect_err("blank instructions");
        assert!(matches!(err, AppError::InvalidParameter(_)));
    }
}

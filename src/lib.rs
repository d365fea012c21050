pub mod auth;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod merge;
pub mod narrator;
mod openai;
pub mod session;
pub mod sidecar_api;
pub mod speaker;
#[cfg(feature = "integration-test-api")]
pub mod test_support;

pub use merge::{MergeOrchestrator, MergeRequest, merge};
pub use openai::block_on_async;

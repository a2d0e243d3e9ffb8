//! Provider interfaces for external systems.
//!
//! Stages never talk to a vendor API directly. Each capability (text, speech,
//! images, motion rendering, final assembly) is a trait, and a
//! [`ProviderRegistry`] maps provider ids to the strategy objects that
//! implement it.

pub mod command;
pub mod ffmpeg;
pub mod registry;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{CharacterTimingTable, Motion, Orientation};
use crate::error::PipelineError;

pub use command::{Capability, CommandProvider};
pub use ffmpeg::{FfmpegAssembler, FfmpegMotionRenderer};
pub use registry::ProviderRegistry;

/// Text generation
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Run one structured generation call.
    ///
    /// `output_schema` is a JSON schema the returned value is expected to
    /// satisfy. Callers still validate the result.
    async fn invoke(
        &self,
        instructions: &str,
        payload: &Value,
        output_schema: &Value,
    ) -> Result<Value, PipelineError>;
}

/// Narration audio plus its per-character timing
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub audio: Vec<u8>,

    /// File extension of `audio` (e.g. "mp3")
    pub format: String,

    /// One entry per character of the synthesized text
    pub timing: CharacterTimingTable,
}

/// Speech synthesis with character timestamps
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        model_version: &str,
    ) -> Result<Synthesis, PipelineError>;
}

/// Still image generation
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Generate one image; returns encoded PNG bytes
    async fn generate(&self, prompt: &str, orientation: Orientation) -> Result<Vec<u8>, PipelineError>;
}

/// One segment's worth of motion rendering
#[derive(Debug, Clone)]
pub struct MotionJob {
    pub images: Vec<PathBuf>,
    /// Seconds on screen per image, index-aligned with `images`
    pub durations: Vec<f64>,
    pub motions: Vec<Motion>,
    pub frame_size: (u32, u32),
    pub fps: u32,
    pub output: PathBuf,
}

impl MotionJob {
    pub fn total_duration(&self) -> f64 {
        self.durations.iter().sum()
    }
}

/// Turns stills into a moving clip. Blocking; runs on the render pool.
pub trait MotionRenderer: Send + Sync {
    fn render(&self, job: &MotionJob) -> Result<(), PipelineError>;
}

/// Final concatenation and muxing
#[async_trait]
pub trait MediaAssembler: Send + Sync {
    /// Concatenate `clips` in order under `audio` and write `output`.
    async fn compose(
        &self,
        clips: &[PathBuf],
        audio: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError>;

    /// Join finished videos, each carrying its own audio, into `output`.
    async fn concatenate(&self, videos: &[PathBuf], output: &Path) -> Result<PathBuf, PipelineError>;

    /// Media duration in seconds
    async fn media_duration(&self, path: &Path) -> Result<f64, PipelineError>;
}

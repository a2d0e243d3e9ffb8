//! Shared fakes for integration tests.
//!
//! Providers answer deterministically and record what they were asked, so
//! tests can run the full stage chain without network access or ffmpeg.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use reelsmith::adapters::{
    ImageProvider, LlmProvider, MediaAssembler, MotionJob, MotionRenderer, ProviderRegistry,
    Synthesis, TtsProvider,
};
use reelsmith::core::{
    ArtifactStore, Governor, ProviderLimits, RenderPool, StageContext, StageSettings,
};
use reelsmith::domain::{
    Brief, CharacterTimingTable, Orientation, PipelineState, ProviderId, TimelineSettings,
};
use reelsmith::error::PipelineError;

pub const SCRIPT: &str = "Octopuses have three hearts. Two of them pump blood to the gills.";
pub const SEGMENTS: [&str; 2] = ["Octopuses have three hearts.", "Two of them pump blood to the gills."];

/// Long-form sections: (name, section script)
pub const SECTIONS: [(&str, &str); 2] = [
    ("Anatomy", "Octopuses have three hearts. Two pump blood to the gills."),
    ("Blood", "Their blood is blue. Copper carries the oxygen."),
];

/// Segments of a section script, split after each sentence
pub fn section_segments(script: &str) -> Vec<String> {
    script
        .split_inclusive(". ")
        .map(|s| s.trim().to_string())
        .collect()
}

/// Seconds between consecutive character onsets in fake narration
pub const CHAR_STEP: f64 = 0.2;

pub fn brief() -> Brief {
    Brief::from_yaml(
        r#"
topic: Octopus anatomy
purpose: Teach one surprising fact
target_audience: Curious teenagers
duration_seconds: 30
voice_actor: Rachel
"#,
    )
    .unwrap()
}

pub fn long_form_brief() -> Brief {
    Brief::from_yaml(
        r#"
topic: Octopus anatomy
purpose: Explain how an octopus moves blood
target_audience: Curious teenagers
duration_seconds: 120
voice_actor: Rachel
format: long_form
"#,
    )
    .unwrap()
}

pub fn seed_state(brief: Brief) -> PipelineState {
    PipelineState::new(brief, TimelineSettings::default()).unwrap()
}

/// Evenly spaced timing: character i starts at `i * step`
pub fn timing_for(text: &str, step: f64) -> CharacterTimingTable {
    let characters: Vec<char> = text.chars().collect();
    let starts: Vec<f64> = (0..characters.len()).map(|i| i as f64 * step).collect();
    let ends: Vec<f64> = starts.iter().map(|s| s + step).collect();
    CharacterTimingTable::new(characters, starts, ends).unwrap()
}

/// LLM fake that answers by the shape of the payload it receives
#[derive(Default)]
pub struct FakeLlm {
    pub calls: AtomicUsize,
    pub payloads: Mutex<Vec<Value>>,
    /// Answer image-description calls with one description too few
    pub short_descriptions: bool,
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        "fake-llm"
    }

    async fn invoke(
        &self,
        _instructions: &str,
        payload: &Value,
        _output_schema: &Value,
    ) -> Result<Value, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());

        if let Some(count) = payload.get("num_of_image_descriptions").and_then(Value::as_u64) {
            let count = if self.short_descriptions {
                count.saturating_sub(1)
            } else {
                count
            };
            let segment = payload["script_segment"].as_str().unwrap_or_default();
            let descriptions: Vec<Value> = (0..count)
                .map(|i| json!({ "description": format!("{} (shot {})", segment, i + 1), "uses_logo": false }))
                .collect();
            return Ok(json!({ "segment_image_descriptions": descriptions }));
        }
        if let Some(max) = payload.get("max_sections").and_then(Value::as_u64) {
            let sections: Vec<Value> = SECTIONS
                .iter()
                .take(max as usize)
                .map(|(name, _)| {
                    json!({
                        "section_name": name,
                        "section_purpose": format!("Cover {}", name),
                        "section_directives": ["Keep it short"],
                        "section_talking_points": [[format!("{} facts", name)]],
                    })
                })
                .collect();
            return Ok(json!({ "sections_structure_list": sections }));
        }
        if let Some(info) = payload.get("section_information") {
            let name = info["section_name"].as_str().unwrap_or_default();
            let script = SECTIONS
                .iter()
                .find(|(section, _)| *section == name)
                .map(|(_, script)| *script)
                .unwrap_or_default();
            return Ok(json!({ "section_script": script }));
        }
        if let Some(script) = payload.get("section_script").and_then(Value::as_str) {
            let list: Vec<Value> = section_segments(script)
                .into_iter()
                .map(|s| json!({ "section_script_segment": s }))
                .collect();
            return Ok(json!({ "section_script_segmented_as_list": list }));
        }
        if payload.get("enhanced_script").is_some() {
            let list: Vec<Value> = SEGMENTS
                .iter()
                .map(|s| json!({ "script_segment": s, "enhanced_script_segment": s }))
                .collect();
            return Ok(json!({ "script_list": list }));
        }
        if payload.get("script").is_some() {
            let script = payload["script"].as_str().unwrap_or_default();
            return Ok(json!({ "enhanced_script": script }));
        }
        if payload.get("hook").is_some() {
            return Ok(json!({ "script": SCRIPT }));
        }
        if payload.get("tone").is_some() {
            return Ok(json!({ "hook": "Three hearts, one octopus." }));
        }
        Ok(json!({ "goal": "Make viewers remember octopus hearts" }))
    }
}

/// TTS fake with evenly spaced character timing
#[derive(Default)]
pub struct FakeTts {
    pub texts: Mutex<Vec<String>>,
    pub voices: Mutex<Vec<String>>,
    /// Drop this many entries from the end of the timing table
    pub truncate: usize,
    /// Reported audio format (defaults to mp3)
    pub format: Option<String>,
}

#[async_trait]
impl TtsProvider for FakeTts {
    fn name(&self) -> &str {
        "fake-tts"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        _model_version: &str,
    ) -> Result<Synthesis, PipelineError> {
        self.texts.lock().unwrap().push(text.to_string());
        self.voices.lock().unwrap().push(voice_id.to_string());

        let keep = text.chars().count().saturating_sub(self.truncate);
        let spoken: String = text.chars().take(keep).collect();

        Ok(Synthesis {
            audio: b"ID3fake".to_vec(),
            format: self.format.clone().unwrap_or_else(|| "mp3".to_string()),
            timing: timing_for(&spoken, CHAR_STEP),
        })
    }
}

/// Image fake; fails the first `failures` calls
#[derive(Default)]
pub struct FakeImage {
    pub calls: AtomicUsize,
    pub failures: usize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImage {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ImageProvider for FakeImage {
    fn name(&self) -> &str {
        "fake-image"
    }

    async fn generate(&self, prompt: &str, _orientation: Orientation) -> Result<Vec<u8>, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(PipelineError::provider("imagen", "quota exceeded"));
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(b"\x89PNG".to_vec())
    }
}

/// Renderer fake that writes a placeholder clip and records the job
#[derive(Default)]
pub struct FakeRenderer {
    pub jobs: Mutex<Vec<MotionJob>>,
}

impl MotionRenderer for FakeRenderer {
    fn render(&self, job: &MotionJob) -> Result<(), PipelineError> {
        std::fs::write(&job.output, b"clip")?;
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Assembler fake; every media file measures one second
#[derive(Default)]
pub struct FakeAssembler {
    pub composed: Mutex<Vec<Vec<PathBuf>>>,
    /// Audio of each compose call, in call order
    pub audio: Mutex<Vec<PathBuf>>,
    pub concatenated: Mutex<Vec<Vec<PathBuf>>>,
}

#[async_trait]
impl MediaAssembler for FakeAssembler {
    async fn compose(
        &self,
        clips: &[PathBuf],
        audio: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        self.composed.lock().unwrap().push(clips.to_vec());
        self.audio.lock().unwrap().push(audio.to_path_buf());
        tokio::fs::write(output, b"video").await?;
        Ok(output.to_path_buf())
    }

    async fn concatenate(&self, videos: &[PathBuf], output: &Path) -> Result<PathBuf, PipelineError> {
        self.concatenated.lock().unwrap().push(videos.to_vec());
        tokio::fs::write(output, b"video").await?;
        Ok(output.to_path_buf())
    }

    async fn media_duration(&self, _path: &Path) -> Result<f64, PipelineError> {
        Ok(1.0)
    }
}

/// All fakes of one test, kept for assertions
pub struct Fakes {
    pub llm: Arc<FakeLlm>,
    pub tts: Arc<FakeTts>,
    pub image: Arc<FakeImage>,
    pub renderer: Arc<FakeRenderer>,
    pub assembler: Arc<FakeAssembler>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            llm: Arc::new(FakeLlm::default()),
            tts: Arc::new(FakeTts::default()),
            image: Arc::new(FakeImage::default()),
            renderer: Arc::new(FakeRenderer::default()),
            assembler: Arc::new(FakeAssembler::default()),
        }
    }
}

impl Fakes {
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::new(self.renderer.clone(), self.assembler.clone())
            .with_llm("gemini", self.llm.clone())
            .with_tts("elevenlabs", self.tts.clone())
            .with_image("imagen", self.image.clone())
    }
}

/// Unthrottled limits for the default provider ids
pub fn fast_governor() -> Governor {
    Governor::from_limits(vec![
        (ProviderId::from("gemini"), ProviderLimits::new(2)),
        (ProviderId::from("elevenlabs"), ProviderLimits::new(1)),
        (ProviderId::from("imagen"), ProviderLimits::new(4)),
    ])
}

/// Default stage settings plus a voice table entry for the test brief
pub fn settings() -> StageSettings {
    let mut settings = StageSettings::default();
    settings
        .voices
        .insert("Rachel".to_string(), "21m00Tcm4TlvDq8ikWAM".to_string());
    settings
}

pub fn context(fakes: &Fakes, output: &Path) -> StageContext {
    context_with(fakes, output, settings())
}

pub fn context_with(fakes: &Fakes, output: &Path, settings: StageSettings) -> StageContext {
    StageContext::new(
        Arc::new(fakes.registry()),
        Arc::new(fast_governor()),
        Arc::new(RenderPool::new(2)),
        ArtifactStore::new(output),
        settings,
    )
}

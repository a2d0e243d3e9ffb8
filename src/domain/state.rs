//! Pipeline state threaded through every stage.
//!
//! A [`PipelineState`] is created once per run from a validated [`Brief`].
//! Stages never mutate it: each returns a [`StateDelta`] that the orchestrator
//! merges into a new state value before the next stage runs.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::ImagePlan;
use super::script::ScriptSegment;
use super::section::Section;
use super::task::ProviderId;
use super::timing::CharacterTimingTable;
use crate::error::PipelineError;

/// Video orientation requested by the brief
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    /// Output frame size (width, height)
    pub fn frame_size(&self) -> (u32, u32) {
        match self {
            Orientation::Portrait => (1080, 1920),
            Orientation::Landscape => (1920, 1080),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }
}

/// Which stage chain a brief runs through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    /// One script, one narration, one composition
    #[default]
    ShortForm,
    /// Planned sections, each narrated and composed on its own
    LongForm,
}

impl VideoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoFormat::ShortForm => "short_form",
            VideoFormat::LongForm => "long_form",
        }
    }
}

/// The content brief that seeds a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brief {
    pub topic: String,

    /// What the video should accomplish
    pub purpose: String,

    pub target_audience: String,

    #[serde(default = "default_tone")]
    pub tone: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    /// Target length of the finished video
    pub duration_seconds: u32,

    #[serde(default)]
    pub orientation: Orientation,

    #[serde(default)]
    pub format: VideoFormat,

    /// Upper bound on planned sections (long form only)
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,

    /// Voice name from the configured voice table, or a raw voice id
    pub voice_actor: String,

    #[serde(default = "default_voice_model_version")]
    pub voice_model_version: String,

    #[serde(default = "default_llm_provider")]
    pub llm_provider: ProviderId,

    #[serde(default = "default_tts_provider")]
    pub tts_provider: ProviderId,

    #[serde(default = "default_image_provider")]
    pub image_provider: ProviderId,

    #[serde(default)]
    pub image_style: Option<String>,

    /// Narrate the enhanced (delivery-cued) script instead of the raw one
    #[serde(default)]
    pub enhance_for_audio: bool,

    #[serde(default)]
    pub additional_instructions: Option<String>,

    #[serde(default)]
    pub additional_image_requests: Option<String>,

    /// Append the configured black buffer clip after the last segment
    #[serde(default)]
    pub add_end_buffer: bool,

    /// Run the debug report stage after assembly
    #[serde(default)]
    pub debug: bool,
}

fn default_tone() -> String {
    "informative".to_string()
}
fn default_platform() -> String {
    "TikTok".to_string()
}
fn default_max_sections() -> usize {
    3
}
fn default_voice_model_version() -> String {
    "eleven_v3".to_string()
}
fn default_llm_provider() -> ProviderId {
    ProviderId::from("gemini")
}
fn default_tts_provider() -> ProviderId {
    ProviderId::from("elevenlabs")
}
fn default_image_provider() -> ProviderId {
    ProviderId::from("imagen")
}

impl Brief {
    /// Load a brief from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read brief file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a brief from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse brief YAML")
    }

    /// Check the seed fields every run depends on
    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            ("topic", &self.topic),
            ("purpose", &self.purpose),
            ("target_audience", &self.target_audience),
            ("voice_actor", &self.voice_actor),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::InvalidInput {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        if self.format == VideoFormat::LongForm && self.max_sections == 0 {
            return Err(PipelineError::InvalidInput {
                field: "max_sections".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.duration_seconds == 0 {
            return Err(PipelineError::InvalidInput {
                field: "duration_seconds".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Image timing policy and narration join behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSettings {
    /// Seconds each image is shown before the segment's last image
    #[serde(default = "default_ideal_image_duration")]
    pub ideal_image_duration: f64,

    /// Shortest leftover that still earns its own image
    #[serde(default = "default_min_image_duration")]
    pub min_image_duration: f64,

    /// Delimiter characters between consecutive segments in the narration text
    #[serde(default = "default_join_width")]
    pub join_width: usize,
}

fn default_ideal_image_duration() -> f64 {
    3.0
}
fn default_min_image_duration() -> f64 {
    2.0
}
fn default_join_width() -> usize {
    1
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            ideal_image_duration: default_ideal_image_duration(),
            min_image_duration: default_min_image_duration(),
            join_width: default_join_width(),
        }
    }
}

impl TimelineSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.ideal_image_duration.is_finite() || self.ideal_image_duration <= 0.0 {
            return Err(PipelineError::InvalidInput {
                field: "timeline.ideal_image_duration".to_string(),
                reason: format!("must be positive, got {}", self.ideal_image_duration),
            });
        }
        if !self.min_image_duration.is_finite() || self.min_image_duration < 0.0 {
            return Err(PipelineError::InvalidInput {
                field: "timeline.min_image_duration".to_string(),
                reason: format!("must be non-negative, got {}", self.min_image_duration),
            });
        }
        Ok(())
    }
}

/// Fields populated incrementally by stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    VoiceId,
    Goal,
    Hook,
    Script,
    EnhancedScript,
    Segments,
    NarrationAudio,
    TimingTable,
    SegmentTimings,
    ImagePlans,
    ImagePrompts,
    ImagePaths,
    ClipPaths,
    Sections,
    SectionScripts,
    SectionSegments,
    SectionNarration,
    SectionTimings,
    SectionImagePrompts,
    SectionImagePaths,
    SectionVideos,
    FinalVideo,
    DebugReport,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateField::VoiceId => "voice_id",
            StateField::Goal => "goal",
            StateField::Hook => "hook",
            StateField::Script => "script",
            StateField::EnhancedScript => "enhanced_script",
            StateField::Segments => "segments",
            StateField::NarrationAudio => "narration_audio",
            StateField::TimingTable => "timing_table",
            StateField::SegmentTimings => "segment_timings",
            StateField::ImagePlans => "image_plans",
            StateField::ImagePrompts => "image_prompts",
            StateField::ImagePaths => "image_paths",
            StateField::ClipPaths => "clip_paths",
            StateField::Sections => "sections",
            StateField::SectionScripts => "section_scripts",
            StateField::SectionSegments => "section_segments",
            StateField::SectionNarration => "section_narration",
            StateField::SectionTimings => "section_timings",
            StateField::SectionImagePrompts => "section_image_prompts",
            StateField::SectionImagePaths => "section_image_paths",
            StateField::SectionVideos => "section_videos",
            StateField::FinalVideo => "final_video",
            StateField::DebugReport => "debug_report",
        };
        f.write_str(name)
    }
}

/// The record threaded through all stages of a run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub brief: Brief,
    pub timeline: TimelineSettings,

    pub voice_id: Option<String>,
    pub goal: Option<String>,
    pub hook: Option<String>,
    pub script: Option<String>,
    pub enhanced_script: Option<String>,
    pub segments: Option<Vec<ScriptSegment>>,
    pub narration_audio: Option<PathBuf>,
    pub timing_table: Option<CharacterTimingTable>,
    pub image_plans: Option<Vec<ImagePlan>>,
    /// Image prompts per segment, index-aligned with `segments`
    pub image_prompts: Option<Vec<Vec<String>>>,
    /// Generated image files per segment, index-aligned with `image_prompts`
    pub image_paths: Option<Vec<Vec<PathBuf>>>,
    pub clip_paths: Option<Vec<PathBuf>>,
    /// Long-form sections in narration order
    pub sections: Option<Vec<Section>>,
    pub final_video: Option<PathBuf>,
    pub debug_report: Option<PathBuf>,
}

impl PipelineState {
    /// Create the seed state for a run, validating the brief and timeline
    pub fn new(brief: Brief, timeline: TimelineSettings) -> Result<Self, PipelineError> {
        brief.validate()?;
        timeline.validate()?;

        Ok(Self {
            run_id: Uuid::new_v4(),
            brief,
            timeline,
            voice_id: None,
            goal: None,
            hook: None,
            script: None,
            enhanced_script: None,
            segments: None,
            narration_audio: None,
            timing_table: None,
            image_plans: None,
            image_prompts: None,
            image_paths: None,
            clip_paths: None,
            sections: None,
            final_video: None,
            debug_report: None,
        })
    }

    /// Whether a stage-produced field is available
    pub fn has(&self, field: StateField) -> bool {
        match field {
            StateField::VoiceId => self.voice_id.is_some(),
            StateField::Goal => self.goal.is_some(),
            StateField::Hook => self.hook.is_some(),
            StateField::Script => self.script.is_some(),
            StateField::EnhancedScript => self.enhanced_script.is_some(),
            StateField::Segments => self.segments.is_some(),
            StateField::NarrationAudio => self.narration_audio.is_some(),
            StateField::TimingTable => self.timing_table.is_some(),
            StateField::SegmentTimings => self
                .segments
                .as_ref()
                .map(|segments| segments.iter().all(|s| s.timing.is_some()))
                .unwrap_or(false),
            StateField::ImagePlans => self.image_plans.is_some(),
            StateField::ImagePrompts => self.image_prompts.is_some(),
            StateField::ImagePaths => self.image_paths.is_some(),
            StateField::ClipPaths => self.clip_paths.is_some(),
            StateField::Sections => self.every_section(|_| true),
            StateField::SectionScripts => self.every_section(|s| s.script.is_some()),
            StateField::SectionSegments => self.every_section(|s| s.segments.is_some()),
            StateField::SectionNarration => {
                self.every_section(|s| s.narration_audio.is_some() && s.timing_table.is_some())
            }
            StateField::SectionTimings => self.every_section(Section::is_aligned),
            StateField::SectionImagePrompts => {
                self.every_section(|s| s.image_plans.is_some() && s.image_prompts.is_some())
            }
            StateField::SectionImagePaths => self.every_section(|s| s.image_paths.is_some()),
            StateField::SectionVideos => self.every_section(|s| s.video.is_some()),
            StateField::FinalVideo => self.final_video.is_some(),
            StateField::DebugReport => self.debug_report.is_some(),
        }
    }

    /// Sections exist and each one satisfies `check`
    fn every_section(&self, check: impl Fn(&Section) -> bool) -> bool {
        self.sections
            .as_ref()
            .map(|sections| !sections.is_empty() && sections.iter().all(check))
            .unwrap_or(false)
    }

    /// Fold a stage's delta into a new state value
    pub fn merge(mut self, delta: StateDelta) -> Self {
        if let Some(voice_id) = delta.voice_id {
            self.voice_id = Some(voice_id);
        }
        if let Some(goal) = delta.goal {
            self.goal = Some(goal);
        }
        if let Some(hook) = delta.hook {
            self.hook = Some(hook);
        }
        if let Some(script) = delta.script {
            self.script = Some(script);
        }
        if let Some(enhanced_script) = delta.enhanced_script {
            self.enhanced_script = Some(enhanced_script);
        }
        if let Some(segments) = delta.segments {
            self.segments = Some(segments);
        }
        if let Some(narration_audio) = delta.narration_audio {
            self.narration_audio = Some(narration_audio);
        }
        if let Some(timing_table) = delta.timing_table {
            self.timing_table = Some(timing_table);
        }
        if let Some(image_plans) = delta.image_plans {
            self.image_plans = Some(image_plans);
        }
        if let Some(image_prompts) = delta.image_prompts {
            self.image_prompts = Some(image_prompts);
        }
        if let Some(image_paths) = delta.image_paths {
            self.image_paths = Some(image_paths);
        }
        if let Some(clip_paths) = delta.clip_paths {
            self.clip_paths = Some(clip_paths);
        }
        if let Some(sections) = delta.sections {
            self.sections = Some(sections);
        }
        if let Some(final_video) = delta.final_video {
            self.final_video = Some(final_video);
        }
        if let Some(debug_report) = delta.debug_report {
            self.debug_report = Some(debug_report);
        }
        self
    }

    /// The script variant that is narrated
    pub fn narrated_script(&self) -> Option<&str> {
        if self.brief.enhance_for_audio {
            self.enhanced_script.as_deref()
        } else {
            self.script.as_deref()
        }
    }
}

/// Fields produced by one stage execution
#[derive(Debug, Clone, Default)]
pub struct StateDelta {
    pub voice_id: Option<String>,
    pub goal: Option<String>,
    pub hook: Option<String>,
    pub script: Option<String>,
    pub enhanced_script: Option<String>,
    pub segments: Option<Vec<ScriptSegment>>,
    pub narration_audio: Option<PathBuf>,
    pub timing_table: Option<CharacterTimingTable>,
    pub image_plans: Option<Vec<ImagePlan>>,
    pub image_prompts: Option<Vec<Vec<String>>>,
    pub image_paths: Option<Vec<Vec<PathBuf>>>,
    pub clip_paths: Option<Vec<PathBuf>>,
    pub sections: Option<Vec<Section>>,
    pub final_video: Option<PathBuf>,
    pub debug_report: Option<PathBuf>,
}

impl StateDelta {
    /// Names of the fields this delta sets (for logging)
    pub fn fields(&self) -> Vec<StateField> {
        let present = [
            (StateField::VoiceId, self.voice_id.is_some()),
            (StateField::Goal, self.goal.is_some()),
            (StateField::Hook, self.hook.is_some()),
            (StateField::Script, self.script.is_some()),
            (StateField::EnhancedScript, self.enhanced_script.is_some()),
            (StateField::Segments, self.segments.is_some()),
            (StateField::NarrationAudio, self.narration_audio.is_some()),
            (StateField::TimingTable, self.timing_table.is_some()),
            (StateField::ImagePlans, self.image_plans.is_some()),
            (StateField::ImagePrompts, self.image_prompts.is_some()),
            (StateField::ImagePaths, self.image_paths.is_some()),
            (StateField::ClipPaths, self.clip_paths.is_some()),
            (StateField::Sections, self.sections.is_some()),
            (StateField::FinalVideo, self.final_video.is_some()),
            (StateField::DebugReport, self.debug_report.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(field, set)| set.then_some(field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SegmentTiming;

    const BRIEF_YAML: &str = r#"
topic: Why octopuses have three hearts
purpose: educate
target_audience: curious teenagers
duration_seconds: 45
voice_actor: british_female_narrator
debug: true
"#;

    #[test]
    fn test_brief_defaults() {
        let brief = Brief::from_yaml(BRIEF_YAML).unwrap();

        assert_eq!(brief.orientation, Orientation::Portrait);
        assert_eq!(brief.llm_provider, ProviderId::from("gemini"));
        assert_eq!(brief.tts_provider, ProviderId::from("elevenlabs"));
        assert_eq!(brief.image_provider, ProviderId::from("imagen"));
        assert!(!brief.enhance_for_audio);
        assert!(brief.debug);
        assert_eq!(brief.format, VideoFormat::ShortForm);
        assert_eq!(brief.max_sections, 3);
    }

    #[test]
    fn test_long_form_brief() {
        let yaml = format!("{}format: long_form\nmax_sections: 0\n", BRIEF_YAML);
        let brief = Brief::from_yaml(&yaml).unwrap();
        assert_eq!(brief.format, VideoFormat::LongForm);

        let result = PipelineState::new(brief, TimelineSettings::default());
        assert!(matches!(
            result,
            Err(PipelineError::InvalidInput { ref field, .. }) if field == "max_sections"
        ));
    }

    #[test]
    fn test_section_fields_need_every_section() {
        use crate::domain::{Section, SectionOutline};

        let brief = Brief::from_yaml(BRIEF_YAML).unwrap();
        let state = PipelineState::new(brief, TimelineSettings::default()).unwrap();
        assert!(!state.has(StateField::Sections));

        let outline = |name: &str| SectionOutline {
            name: name.to_string(),
            purpose: "p".to_string(),
            directives: Vec::new(),
            talking_points: Vec::new(),
        };
        let mut scripted = Section::new(outline("one"));
        scripted.script = Some("One.".to_string());

        let state = state.merge(StateDelta {
            sections: Some(vec![scripted, Section::new(outline("two"))]),
            ..Default::default()
        });
        assert!(state.has(StateField::Sections));
        assert!(!state.has(StateField::SectionScripts));

        let state = state.merge(StateDelta {
            sections: Some(Vec::new()),
            ..Default::default()
        });
        assert!(!state.has(StateField::Sections));
    }

    #[test]
    fn test_seed_validation() {
        let mut brief = Brief::from_yaml(BRIEF_YAML).unwrap();
        brief.topic = "  ".to_string();

        let result = PipelineState::new(brief, TimelineSettings::default());
        assert!(matches!(
            result,
            Err(PipelineError::InvalidInput { ref field, .. }) if field == "topic"
        ));
    }

    #[test]
    fn test_timeline_validation() {
        let brief = Brief::from_yaml(BRIEF_YAML).unwrap();
        let timeline = TimelineSettings {
            ideal_image_duration: 0.0,
            ..Default::default()
        };
        assert!(PipelineState::new(brief, timeline).is_err());
    }

    #[test]
    fn test_merge_is_additive() {
        let brief = Brief::from_yaml(BRIEF_YAML).unwrap();
        let state = PipelineState::new(brief, TimelineSettings::default()).unwrap();
        assert!(!state.has(StateField::Goal));

        let state = state.merge(StateDelta {
            goal: Some("Explain the circulatory system".to_string()),
            ..Default::default()
        });
        let state = state.merge(StateDelta {
            hook: Some("Three hearts. Blue blood.".to_string()),
            ..Default::default()
        });

        assert!(state.has(StateField::Goal));
        assert!(state.has(StateField::Hook));
        assert_eq!(state.goal.as_deref(), Some("Explain the circulatory system"));
    }

    #[test]
    fn test_segment_timings_require_every_segment() {
        let brief = Brief::from_yaml(BRIEF_YAML).unwrap();
        let state = PipelineState::new(brief, TimelineSettings::default())
            .unwrap()
            .merge(StateDelta {
                segments: Some(vec![
                    ScriptSegment::new("One.", "One.").with_timing(SegmentTiming::new(0.0, 1.0)),
                    ScriptSegment::new("Two.", "Two."),
                ]),
                ..Default::default()
            });

        assert!(state.has(StateField::Segments));
        assert!(!state.has(StateField::SegmentTimings));
    }

    #[test]
    fn test_delta_fields() {
        let delta = StateDelta {
            narration_audio: Some(PathBuf::from("/tmp/a.mp3")),
            ..Default::default()
        };
        assert_eq!(delta.fields(), vec![StateField::NarrationAudio]);
        assert!(StateDelta::default().is_empty());
    }
}

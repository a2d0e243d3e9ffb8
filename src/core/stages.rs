//! The short-form video stage chain.
//!
//! Text stages ask the configured LLM for small typed JSON documents, the
//! narration stage synthesizes the joined segment text, and the visual stages
//! fan out through the governor (provider calls) or the render pool (motion
//! rendering). Every provider call, even a single one, goes through the
//! governor so per-provider limits hold across stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::aligner;
use super::artifacts::{clean_extension, write_to, ArtifactCategory};
use super::governor::{settle, GenerationTask, TaskMeta};
use super::partitioner;
use super::pipeline::{Pipeline, Stage, StageContext};
use crate::adapters::{ImageProvider, MediaAssembler, MotionJob};
use crate::domain::{
    Brief, CharacterTimingTable, ImagePlan, Motion, Orientation, PipelineState, ProviderId,
    ScriptSegment, StateDelta, StateField, TaskId, VideoFormat,
};
use crate::error::{AggregateError, AlignmentError, PipelineError};

const GOAL_INSTRUCTIONS: &str = "Write one sentence stating the angle this short video takes \
and what it intends to achieve for its audience. Respond with JSON {\"goal\": string}.";

const HOOK_INSTRUCTIONS: &str = "Write the opening line of a short-form video. It must stop the \
scroll within two seconds. Respond with JSON {\"hook\": string}.";

const SCRIPT_INSTRUCTIONS: &str = "Write the full narration script for a short-form video that \
opens with the given hook, serves the goal, and fits the requested duration. Plain spoken text \
only. Respond with JSON {\"script\": string}.";

const ENHANCE_INSTRUCTIONS: &str = "Add bracketed delivery cues for expressive speech synthesis \
to the script without changing its words. Respond with JSON {\"enhanced_script\": string}.";

const SEGMENT_INSTRUCTIONS: &str = "Split the script into cohesive, logically separate segments \
in order, covering all of it. Pair each raw segment with the matching part of the enhanced \
script. Respond with JSON {\"script_list\": [{\"script_segment\": string, \
\"enhanced_script_segment\": string}]}.";

const IMAGE_INSTRUCTIONS: &str = "Describe exactly num_of_image_descriptions still images that \
illustrate the script segment in order, in the requested style. Respond with JSON \
{\"segment_image_descriptions\": [{\"description\": string}]}.";

/// The default chain: text, narration, timing, visuals, assembly, and the
/// optional debug report.
pub fn short_form_pipeline() -> Pipeline {
    Pipeline::new("short_form")
        .stage(ResolveVoice)
        .stage(GenerateGoal)
        .stage(GenerateHook)
        .stage(GenerateScript)
        .stage(EnhanceScript)
        .stage(SegmentScript)
        .stage(SynthesizeNarration)
        .stage(AlignSegments)
        .stage(DescribeImages)
        .stage(GenerateImages)
        .stage(AnimateSegments)
        .stage(AssembleVideo)
        .debug_stage(DebugReport)
        .produces(StateField::FinalVideo)
}

/// The chain a brief's format asks for
pub fn pipeline_for(format: VideoFormat) -> Pipeline {
    match format {
        VideoFormat::ShortForm => short_form_pipeline(),
        VideoFormat::LongForm => super::long_form::long_form_pipeline(),
    }
}

/// A fan-out failure with a single member is reported as that member's error.
fn single_failure(mut err: AggregateError) -> PipelineError {
    if err.total == 1 && err.failures.len() == 1 && err.cancelled.is_empty() {
        return err.failures.remove(0).error;
    }
    PipelineError::Aggregate(err)
}

/// One LLM call through the governor, parsed into `T`.
pub(super) async fn ask<T: DeserializeOwned>(
    ctx: &StageContext,
    provider: &ProviderId,
    group: &str,
    instructions: &'static str,
    payload: Value,
    schema: Value,
) -> Result<T, PipelineError> {
    let llm = ctx.registry.llm(provider)?;
    let task = GenerationTask::new(TaskId::new(group, 0), provider.clone(), async move {
        llm.invoke(instructions, &payload, &schema).await
    })
    .with_attempt(ctx.attempt);

    let mut values = ctx
        .governor
        .run_all(group, vec![task])
        .await
        .map_err(single_failure)?;
    let value = values
        .pop()
        .ok_or_else(|| PipelineError::provider(provider, "no response"))?;

    parse_output(provider, value)
}

pub(super) fn parse_output<T: DeserializeOwned>(provider: &ProviderId, value: Value) -> Result<T, PipelineError> {
    serde_json::from_value(value)
        .map_err(|e| PipelineError::provider(provider, format!("malformed output: {}", e)))
}

/// Reject blank text fields from an LLM
pub(super) fn non_empty(provider: &ProviderId, field: &str, value: String) -> Result<String, PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::provider(
            provider,
            format!("returned an empty '{}'", field),
        ));
    }
    Ok(value)
}

pub(super) fn string_schema(field: &str) -> Value {
    json!({
        "type": "object",
        "properties": { field: { "type": "string" } },
        "required": [field],
    })
}

/// Fetch a field every caller has already checked via `requires`
pub(super) fn required<'a, T>(
    stage: &str,
    field: StateField,
    value: Option<&'a T>,
) -> Result<&'a T, PipelineError> {
    value.ok_or_else(|| PipelineError::MissingInput {
        stage: stage.to_string(),
        field,
    })
}

/// One TTS call that stores the audio and returns it with its timing table
pub(super) fn narration_task(
    ctx: &StageContext,
    brief: &Brief,
    id: TaskId,
    text: String,
    voice_id: String,
) -> Result<GenerationTask<(PathBuf, CharacterTimingTable)>, PipelineError> {
    let tts = ctx.registry.tts(&brief.tts_provider)?;
    let model_version = brief.voice_model_version.clone();
    let artifacts = ctx.artifacts.clone();

    Ok(GenerationTask::new(id, brief.tts_provider.clone(), async move {
        let synthesis = tts.synthesize(&text, &voice_id, &model_version).await?;
        let extension = clean_extension(&synthesis.format, "mp3");
        let path = artifacts
            .write(ArtifactCategory::Audio, extension, &synthesis.audio)
            .await?;
        Ok((path, synthesis.timing))
    })
    .with_attempt(ctx.attempt))
}

/// The timing table must hold one entry per narrated character
pub(super) fn check_narration_length(
    expected: usize,
    timing: &CharacterTimingTable,
) -> Result<(), PipelineError> {
    if timing.len() != expected {
        return Err(AlignmentError::LengthMismatch {
            expected,
            actual: timing.len(),
        }
        .into());
    }
    Ok(())
}

fn description_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "segment_image_descriptions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": { "description": { "type": "string" } },
                    "required": ["description"],
                },
            },
        },
        "required": ["segment_image_descriptions"],
    })
}

/// Ask for exactly `plan.image_count` prompts illustrating one segment
pub(super) fn image_prompt_task(
    ctx: &StageContext,
    brief: &Brief,
    id: TaskId,
    segment_text: &str,
    full_script: &str,
    plan: &ImagePlan,
) -> Result<GenerationTask<Vec<String>>, PipelineError> {
    let provider = brief.llm_provider.clone();
    let llm = ctx.registry.llm(&provider)?;
    let schema = description_schema();
    let wanted = plan.image_count;
    let payload = json!({
        "script_segment": segment_text,
        "full_script": full_script,
        "additional_image_requests": brief.additional_image_requests,
        "image_style": brief.image_style,
        "topic": brief.topic,
        "tone": brief.tone,
        "num_of_image_descriptions": wanted,
    });

    Ok(GenerationTask::new(id, provider.clone(), async move {
        let value = llm.invoke(IMAGE_INSTRUCTIONS, &payload, &schema).await?;
        let output: ImageDescriptionsOutput = parse_output(&provider, value)?;
        let prompts: Vec<String> = output
            .segment_image_descriptions
            .into_iter()
            .map(|d| d.description)
            .filter(|d| !d.trim().is_empty())
            .collect();

        if prompts.len() != wanted {
            return Err(PipelineError::provider(
                &provider,
                format!("expected {} image descriptions, got {}", wanted, prompts.len()),
            ));
        }
        Ok(prompts)
    })
    .with_attempt(ctx.attempt))
}

/// Generate one image into a fresh file under the images directory
pub(super) fn image_task(
    ctx: &StageContext,
    brief: &Brief,
    image: &Arc<dyn ImageProvider>,
    id: TaskId,
    prompt: &str,
) -> GenerationTask<PathBuf> {
    let target = ctx.artifacts.fresh_path(ArtifactCategory::Images, "png");
    let image = Arc::clone(image);
    let prompt = match &brief.image_style {
        Some(style) => format!("{} Style: {}.", prompt, style),
        None => prompt.to_string(),
    };
    let orientation = brief.orientation;
    let path = target.clone();

    GenerationTask::new(id, brief.image_provider.clone(), async move {
        let bytes = image.generate(&prompt, orientation).await?;
        write_to(&path, &bytes).await?;
        Ok(path)
    })
    .with_target(target)
    .with_attempt(ctx.attempt)
}

/// Split flat, index-ordered results into consecutive groups of `sizes`
pub(super) fn regroup<T>(flat: Vec<T>, sizes: impl IntoIterator<Item = usize>) -> Vec<Vec<T>> {
    let mut flat = flat.into_iter();
    sizes
        .into_iter()
        .map(|size| flat.by_ref().take(size).collect())
        .collect()
}

/// Render every job on the render pool and settle them as one group
pub(super) async fn render_clips(
    group: &str,
    ctx: &StageContext,
    jobs: Vec<MotionJob>,
) -> Result<Vec<PathBuf>, PipelineError> {
    tokio::fs::create_dir_all(ctx.artifacts.category_dir(ArtifactCategory::Clips)).await?;
    let renderer = ctx.registry.renderer();
    let provider = ProviderId::from("renderer");

    let mut metas = Vec::with_capacity(jobs.len());
    let mut renders = Vec::with_capacity(jobs.len());
    for (index, job) in jobs.into_iter().enumerate() {
        metas.push(TaskMeta {
            id: TaskId::new(group, index).for_segment(index),
            provider: provider.clone(),
            target: Some(job.output.clone()),
            attempt: ctx.attempt,
        });

        let renderer = Arc::clone(&renderer);
        renders.push(ctx.render_pool.submit(move || {
            renderer.render(&job)?;
            Ok(job.output)
        }));
    }

    let outcomes = metas.into_iter().zip(join_all(renders).await).collect();
    Ok(settle(group, outcomes)?)
}

/// The configured end buffer clip, when the brief asks for one
pub(super) fn end_buffer_clip(ctx: &StageContext, brief: &Brief) -> Result<Option<PathBuf>, PipelineError> {
    if !brief.add_end_buffer {
        return Ok(None);
    }
    ctx.settings
        .end_buffer(brief.orientation)
        .cloned()
        .map(Some)
        .ok_or_else(|| {
            PipelineError::Config(format!(
                "no end buffer clip configured for {} videos",
                brief.orientation.as_str()
            ))
        })
}

/// Compose clips under narration into a fresh file of `category`
pub(super) async fn compose_into(
    ctx: &StageContext,
    category: ArtifactCategory,
    clips: &[PathBuf],
    audio: &Path,
) -> Result<PathBuf, PipelineError> {
    let output = ctx.artifacts.fresh_path(category, "mp4");
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    ctx.registry.assembler().compose(clips, audio, &output).await
}

#[derive(Debug, Deserialize)]
struct GoalOutput {
    goal: String,
}

#[derive(Debug, Deserialize)]
struct HookOutput {
    hook: String,
}

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    script: String,
}

#[derive(Debug, Deserialize)]
struct EnhancedScriptOutput {
    enhanced_script: String,
}

#[derive(Debug, Deserialize)]
struct SegmentsOutput {
    script_list: Vec<SegmentEntry>,
}

#[derive(Debug, Deserialize)]
struct SegmentEntry {
    script_segment: String,
    #[serde(default)]
    enhanced_script_segment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageDescriptionsOutput {
    segment_image_descriptions: Vec<ImageDescription>,
}

#[derive(Debug, Deserialize)]
struct ImageDescription {
    description: String,
}

/// Map the brief's voice name to a provider voice id
pub struct ResolveVoice;

#[async_trait]
impl Stage for ResolveVoice {
    fn name(&self) -> &'static str {
        "resolve_voice"
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let actor = &state.brief.voice_actor;
        let voice_id = match ctx.settings.voices.get(actor) {
            Some(id) => id.clone(),
            None => {
                debug!(voice_actor = %actor, "Voice not in table, using it as a raw id");
                actor.clone()
            }
        };

        Ok(StateDelta {
            voice_id: Some(voice_id),
            ..Default::default()
        })
    }
}

pub struct GenerateGoal;

#[async_trait]
impl Stage for GenerateGoal {
    fn name(&self) -> &'static str {
        "generate_goal"
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let payload = json!({
            "topic": brief.topic,
            "purpose": brief.purpose,
            "target_audience": brief.target_audience,
        });

        let output: GoalOutput = ask(
            ctx,
            &brief.llm_provider,
            self.name(),
            GOAL_INSTRUCTIONS,
            payload,
            string_schema("goal"),
        )
        .await?;

        Ok(StateDelta {
            goal: Some(non_empty(&brief.llm_provider, "goal", output.goal)?),
            ..Default::default()
        })
    }
}

pub struct GenerateHook;

#[async_trait]
impl Stage for GenerateHook {
    fn name(&self) -> &'static str {
        "generate_hook"
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let payload = json!({
            "topic": brief.topic,
            "purpose": brief.purpose,
            "target_audience": brief.target_audience,
            "tone": brief.tone,
            "platform": brief.platform,
        });

        let output: HookOutput = ask(
            ctx,
            &brief.llm_provider,
            self.name(),
            HOOK_INSTRUCTIONS,
            payload,
            string_schema("hook"),
        )
        .await?;

        Ok(StateDelta {
            hook: Some(non_empty(&brief.llm_provider, "hook", output.hook)?),
            ..Default::default()
        })
    }
}

pub struct GenerateScript;

#[async_trait]
impl Stage for GenerateScript {
    fn name(&self) -> &'static str {
        "generate_script"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Goal, StateField::Hook]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let payload = json!({
            "topic": brief.topic,
            "goal": required(self.name(), StateField::Goal, state.goal.as_ref())?,
            "hook": required(self.name(), StateField::Hook, state.hook.as_ref())?,
            "purpose": brief.purpose,
            "target_audience": brief.target_audience,
            "tone": brief.tone,
            "additional_requests": brief.additional_instructions,
            "platform": brief.platform,
            "duration_seconds": brief.duration_seconds,
        });

        let output: ScriptOutput = ask(
            ctx,
            &brief.llm_provider,
            self.name(),
            SCRIPT_INSTRUCTIONS,
            payload,
            string_schema("script"),
        )
        .await?;

        Ok(StateDelta {
            script: Some(non_empty(&brief.llm_provider, "script", output.script)?),
            ..Default::default()
        })
    }
}

/// Add delivery cues when the brief narrates the enhanced script; otherwise
/// the enhanced script is the raw script.
pub struct EnhanceScript;

#[async_trait]
impl Stage for EnhanceScript {
    fn name(&self) -> &'static str {
        "enhance_script"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Script]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let script = required(self.name(), StateField::Script, state.script.as_ref())?;

        if !brief.enhance_for_audio {
            return Ok(StateDelta {
                enhanced_script: Some(script.clone()),
                ..Default::default()
            });
        }

        let output: EnhancedScriptOutput = ask(
            ctx,
            &brief.llm_provider,
            self.name(),
            ENHANCE_INSTRUCTIONS,
            json!({ "script": script }),
            string_schema("enhanced_script"),
        )
        .await?;

        Ok(StateDelta {
            enhanced_script: Some(non_empty(
                &brief.llm_provider,
                "enhanced_script",
                output.enhanced_script,
            )?),
            ..Default::default()
        })
    }
}

pub struct SegmentScript;

#[async_trait]
impl Stage for SegmentScript {
    fn name(&self) -> &'static str {
        "segment_script"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Script, StateField::EnhancedScript]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let provider = &brief.llm_provider;
        let payload = json!({
            "script": required(self.name(), StateField::Script, state.script.as_ref())?,
            "enhanced_script": required(
                self.name(),
                StateField::EnhancedScript,
                state.enhanced_script.as_ref(),
            )?,
        });
        let schema = json!({
            "type": "object",
            "properties": {
                "script_list": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "script_segment": { "type": "string" },
                            "enhanced_script_segment": { "type": "string" },
                        },
                        "required": ["script_segment", "enhanced_script_segment"],
                    },
                },
            },
            "required": ["script_list"],
        });

        let output: SegmentsOutput =
            ask(ctx, provider, self.name(), SEGMENT_INSTRUCTIONS, payload, schema).await?;

        if output.script_list.is_empty() {
            return Err(PipelineError::provider(provider, "returned no script segments"));
        }

        let segments: Vec<ScriptSegment> = output
            .script_list
            .into_iter()
            .map(|entry| {
                let enhanced = entry
                    .enhanced_script_segment
                    .unwrap_or_else(|| entry.script_segment.clone());
                ScriptSegment::new(entry.script_segment.trim(), enhanced.trim())
            })
            .collect();

        if let Some(index) = segments
            .iter()
            .position(|s| s.character_length(brief.enhance_for_audio) == 0)
        {
            return Err(PipelineError::provider(
                provider,
                format!("script segment {} is empty", index),
            ));
        }

        info!(segments = segments.len(), "Script segmented");
        Ok(StateDelta {
            segments: Some(segments),
            ..Default::default()
        })
    }
}

/// Synthesize the joined segment text and keep its character timing
pub struct SynthesizeNarration;

#[async_trait]
impl Stage for SynthesizeNarration {
    fn name(&self) -> &'static str {
        "synthesize_narration"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Segments, StateField::VoiceId]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let segments = required(self.name(), StateField::Segments, state.segments.as_ref())?;
        let voice_id = required(self.name(), StateField::VoiceId, state.voice_id.as_ref())?.clone();

        let text = aligner::narration_text(segments, brief.enhance_for_audio, state.timeline.join_width);
        let expected = text.chars().count();
        let task = narration_task(ctx, brief, TaskId::new(self.name(), 0), text, voice_id)?;

        let (audio_path, timing) = ctx
            .governor
            .run_all(self.name(), vec![task])
            .await
            .map_err(single_failure)?
            .pop()
            .ok_or_else(|| PipelineError::provider(&brief.tts_provider, "no response"))?;

        check_narration_length(expected, &timing)?;

        info!(
            audio = %audio_path.display(),
            characters = expected,
            narration_seconds = timing.narration_end(),
            "Narration synthesized"
        );
        Ok(StateDelta {
            narration_audio: Some(audio_path),
            timing_table: Some(timing),
            ..Default::default()
        })
    }
}

pub struct AlignSegments;

#[async_trait]
impl Stage for AlignSegments {
    fn name(&self) -> &'static str {
        "align_segments"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Segments, StateField::TimingTable]
    }

    async fn run(&self, state: &PipelineState, _ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let segments = required(self.name(), StateField::Segments, state.segments.as_ref())?;
        let table = required(self.name(), StateField::TimingTable, state.timing_table.as_ref())?;

        let aligned = aligner::align_segments(
            table,
            segments,
            state.brief.enhance_for_audio,
            state.timeline.join_width,
        )?;

        for (index, segment) in aligned.iter().enumerate() {
            if let Some(timing) = segment.timing {
                debug!(
                    segment = index,
                    start = timing.start_time,
                    end = timing.end_time,
                    duration = timing.duration,
                    "Segment aligned"
                );
            }
        }

        Ok(StateDelta {
            segments: Some(aligned),
            ..Default::default()
        })
    }
}

/// Plan images per segment and ask the LLM for one prompt per image
pub struct DescribeImages;

#[async_trait]
impl Stage for DescribeImages {
    fn name(&self) -> &'static str {
        "describe_images"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Segments, StateField::SegmentTimings, StateField::Script]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let segments = required(self.name(), StateField::Segments, state.segments.as_ref())?;
        let script = required(self.name(), StateField::Script, state.script.as_ref())?;

        let timings: Vec<_> = segments.iter().filter_map(|s| s.timing).collect();
        if timings.len() != segments.len() {
            return Err(PipelineError::MissingInput {
                stage: self.name().to_string(),
                field: StateField::SegmentTimings,
            });
        }
        let plans = partitioner::plan_all(&timings, &state.timeline);

        let tasks = segments
            .iter()
            .zip(&plans)
            .enumerate()
            .map(|(index, (segment, plan))| {
                let id = TaskId::new(self.name(), index).for_segment(index);
                image_prompt_task(ctx, brief, id, &segment.text, script, plan)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let prompts = ctx
            .governor
            .run_all_with(self.name(), tasks, ctx.settings.fan_out)
            .await?;

        info!(
            segments = plans.len(),
            images = plans.iter().map(|p| p.image_count).sum::<usize>(),
            "Image prompts ready"
        );
        Ok(StateDelta {
            image_plans: Some(plans),
            image_prompts: Some(prompts),
            ..Default::default()
        })
    }
}

/// Generate every image of every segment in one fan-out group
pub struct GenerateImages;

#[async_trait]
impl Stage for GenerateImages {
    fn name(&self) -> &'static str {
        "generate_images"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::ImagePrompts]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let prompts = required(self.name(), StateField::ImagePrompts, state.image_prompts.as_ref())?;
        let image = ctx.registry.image(&brief.image_provider)?;

        let mut tasks = Vec::new();
        for (segment, segment_prompts) in prompts.iter().enumerate() {
            for prompt in segment_prompts {
                let id = TaskId::new(self.name(), tasks.len()).for_segment(segment);
                tasks.push(image_task(ctx, brief, &image, id, prompt));
            }
        }

        let paths = ctx
            .governor
            .run_all_with(self.name(), tasks, ctx.settings.fan_out)
            .await?;
        let image_paths = regroup(paths, prompts.iter().map(Vec::len));

        Ok(StateDelta {
            image_paths: Some(image_paths),
            ..Default::default()
        })
    }
}

/// Render one motion clip per segment on the render pool
pub struct AnimateSegments;

#[async_trait]
impl Stage for AnimateSegments {
    fn name(&self) -> &'static str {
        "animate_segments"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::ImagePaths, StateField::ImagePlans]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let image_paths = required(self.name(), StateField::ImagePaths, state.image_paths.as_ref())?;
        let plans = required(self.name(), StateField::ImagePlans, state.image_plans.as_ref())?;

        if image_paths.len() != plans.len() {
            return Err(PipelineError::InvalidInput {
                field: StateField::ImagePaths.to_string(),
                reason: format!("{} segments of images for {} plans", image_paths.len(), plans.len()),
            });
        }

        let jobs = motion_jobs(ctx, state.brief.orientation, image_paths, plans)?;
        let clip_paths = render_clips(self.name(), ctx, jobs).await?;

        Ok(StateDelta {
            clip_paths: Some(clip_paths),
            ..Default::default()
        })
    }
}

/// Build render jobs; the motion pattern continues across the segments given.
pub(super) fn motion_jobs(
    ctx: &StageContext,
    orientation: Orientation,
    image_paths: &[Vec<PathBuf>],
    plans: &[ImagePlan],
) -> Result<Vec<MotionJob>, PipelineError> {
    let pattern = &ctx.settings.motion_pattern;
    let mut images_before = 0usize;
    let mut jobs = Vec::with_capacity(plans.len());

    for (index, (images, plan)) in image_paths.iter().zip(plans).enumerate() {
        if images.len() != plan.image_count {
            return Err(PipelineError::InvalidInput {
                field: StateField::ImagePaths.to_string(),
                reason: format!(
                    "segment {} has {} images but its plan needs {}",
                    index,
                    images.len(),
                    plan.image_count
                ),
            });
        }

        let start = if pattern.is_empty() {
            0
        } else {
            images_before % pattern.len()
        };
        jobs.push(MotionJob {
            images: images.clone(),
            durations: plan.durations(),
            motions: Motion::cycle(pattern, start, images.len()),
            frame_size: orientation.frame_size(),
            fps: ctx.settings.fps,
            output: ctx.artifacts.fresh_path(ArtifactCategory::Clips, "mp4"),
        });
        images_before += images.len();
    }

    Ok(jobs)
}

pub struct AssembleVideo;

#[async_trait]
impl Stage for AssembleVideo {
    fn name(&self) -> &'static str {
        "assemble_video"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::ClipPaths, StateField::NarrationAudio]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let mut clips = required(self.name(), StateField::ClipPaths, state.clip_paths.as_ref())?.clone();
        let audio = required(self.name(), StateField::NarrationAudio, state.narration_audio.as_ref())?;

        if let Some(buffer) = end_buffer_clip(ctx, brief)? {
            clips.push(buffer);
        }

        let final_video = compose_into(ctx, ArtifactCategory::Final, &clips, audio).await?;
        info!(final_video = %final_video.display(), clips = clips.len(), "Video assembled");

        Ok(StateDelta {
            final_video: Some(final_video),
            ..Default::default()
        })
    }
}

/// Per-clip line of the debug report
#[derive(Debug, Serialize, Deserialize)]
pub struct ClipReport {
    /// Owning section of a long-form run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<usize>,
    pub index: usize,
    pub text: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub computed_duration: Option<f64>,
    /// Duration of the rendered clip as measured from the file
    pub actual_duration: Option<f64>,
    pub image_count: Option<usize>,
}

/// JSON dump written by the debug stage
#[derive(Debug, Serialize, Deserialize)]
pub struct DebugReportFile {
    pub run_id: uuid::Uuid,
    pub final_video: Option<PathBuf>,
    pub final_duration: Option<f64>,
    pub narration_seconds: Option<f64>,
    pub clips: Vec<ClipReport>,
    pub state: Value,
}

/// Dump the state plus computed vs. rendered clip timing
pub struct DebugReport;

/// Segments with their clips and plans, grouped by section (`None` for short form)
type ClipGroup<'a> = (Option<usize>, &'a [ScriptSegment], &'a [PathBuf], &'a [ImagePlan]);

fn clip_groups(state: &PipelineState) -> Vec<ClipGroup<'_>> {
    match &state.sections {
        Some(sections) => sections
            .iter()
            .enumerate()
            .map(|(index, section)| {
                (
                    Some(index),
                    section.segments.as_deref().unwrap_or_default(),
                    section.clip_paths.as_deref().unwrap_or_default(),
                    section.image_plans.as_deref().unwrap_or_default(),
                )
            })
            .collect(),
        None => vec![(
            None,
            state.segments.as_deref().unwrap_or_default(),
            state.clip_paths.as_deref().unwrap_or_default(),
            state.image_plans.as_deref().unwrap_or_default(),
        )],
    }
}

#[async_trait]
impl Stage for DebugReport {
    fn name(&self) -> &'static str {
        "debug_report"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::FinalVideo]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let assembler = ctx.registry.assembler();
        let use_enhanced = state.brief.enhance_for_audio;

        let mut clips = Vec::new();
        for (section, segments, clip_paths, plans) in clip_groups(state) {
            for (index, segment) in segments.iter().enumerate() {
                let actual_duration = match clip_paths.get(index) {
                    Some(path) => measured_duration(assembler.as_ref(), path).await,
                    None => None,
                };
                clips.push(ClipReport {
                    section,
                    index,
                    text: segment.narration_text(use_enhanced).to_string(),
                    start_time: segment.timing.map(|t| t.start_time),
                    end_time: segment.timing.map(|t| t.end_time),
                    computed_duration: segment.timing.map(|t| t.duration),
                    actual_duration,
                    image_count: plans.get(index).map(|p| p.image_count),
                });
            }
        }

        for clip in &clips {
            info!(
                section = ?clip.section,
                clip = clip.index + 1,
                computed = ?clip.computed_duration,
                actual = ?clip.actual_duration,
                start = ?clip.start_time,
                end = ?clip.end_time,
                "Clip timing"
            );
        }

        let final_duration = match &state.final_video {
            Some(path) => measured_duration(assembler.as_ref(), path).await,
            None => None,
        };

        let narration_seconds = match &state.sections {
            Some(sections) => sections
                .iter()
                .map(|s| s.narration_seconds())
                .sum::<Option<f64>>(),
            None => state.timing_table.as_ref().map(|t| t.narration_end()),
        };

        let report = DebugReportFile {
            run_id: state.run_id,
            final_video: state.final_video.clone(),
            final_duration,
            narration_seconds,
            clips,
            state: serde_json::to_value(state)?,
        };

        let bytes = serde_json::to_vec_pretty(&report)?;
        let path = ctx.artifacts.write(ArtifactCategory::Debug, "json", &bytes).await?;
        info!(report = %path.display(), "Debug report written");

        Ok(StateDelta {
            debug_report: Some(path),
            ..Default::default()
        })
    }
}

/// Measure a media file, logging instead of failing
async fn measured_duration(assembler: &dyn MediaAssembler, path: &Path) -> Option<f64> {
    match assembler.media_duration(path).await {
        Ok(duration) => Some(duration),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not measure duration");
            None
        }
    }
}

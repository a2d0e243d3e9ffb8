//! The long-form video stage chain.
//!
//! A long-form run plans its sections first, writes them one after another
//! so each script can build on the ones before it, and then carries every
//! section through narration, timing, images and clips on its own. Each
//! section is composed under its own narration; the final video joins the
//! section videos in order.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::aligner;
use super::artifacts::ArtifactCategory;
use super::governor::GenerationTask;
use super::partitioner;
use super::pipeline::{Pipeline, Stage, StageContext};
use super::stages::{
    ask, check_narration_length, compose_into, end_buffer_clip, image_prompt_task, image_task,
    motion_jobs, narration_task, non_empty, parse_output, regroup, render_clips, required,
    string_schema, DebugReport, GenerateGoal, ResolveVoice,
};
use crate::domain::{
    Brief, PipelineState, ProviderId, ScriptSegment, Section, SectionOutline, StateDelta,
    StateField, TaskId,
};
use crate::error::PipelineError;

const STRUCTURE_INSTRUCTIONS: &str = "Plan the sections of a long-form video that serves the goal. \
Use at most max_sections sections. For each give a name, its purpose, directives for the writer \
and the talking points it covers. Respond with JSON {\"sections_structure_list\": \
[{\"section_name\": string, \"section_purpose\": string, \"section_directives\": [string], \
\"section_talking_points\": [[string]]}]}.";

const SECTION_SCRIPT_INSTRUCTIONS: &str = "Write the narration for one section of a long-form \
video. Continue naturally from cumulative_script without repeating it, and cover only the \
section described in section_information. Plain spoken text only. Respond with JSON \
{\"section_script\": string}.";

const SECTION_SEGMENT_INSTRUCTIONS: &str = "Split the section script into cohesive, logically \
separate segments in order, covering all of it. Respond with JSON \
{\"section_script_segmented_as_list\": [{\"section_script_segment\": string}]}.";

/// Sections are planned, written and segmented first; each is then narrated,
/// aligned, illustrated and composed on its own before the section videos
/// are joined.
pub fn long_form_pipeline() -> Pipeline {
    Pipeline::new("long_form")
        .stage(ResolveVoice)
        .stage(GenerateGoal)
        .stage(GenerateStructure)
        .stage(GenerateSectionScripts)
        .stage(SegmentSections)
        .stage(SynthesizeSections)
        .stage(AlignSections)
        .stage(DescribeSectionImages)
        .stage(GenerateSectionImages)
        .stage(AnimateSections)
        .stage(AssembleSections)
        .debug_stage(DebugReport)
        .produces(StateField::FinalVideo)
}

fn sections<'a>(stage: &str, state: &'a PipelineState) -> Result<&'a [Section], PipelineError> {
    required(stage, StateField::Sections, state.sections.as_ref()).map(Vec::as_slice)
}

#[derive(Debug, Deserialize)]
struct StructureOutput {
    sections_structure_list: Vec<StructureEntry>,
}

#[derive(Debug, Deserialize)]
struct StructureEntry {
    section_name: String,
    section_purpose: String,
    #[serde(default)]
    section_directives: Vec<String>,
    /// Models nest these unevenly; flattened on parse
    #[serde(default)]
    section_talking_points: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SectionScriptOutput {
    section_script: String,
}

#[derive(Debug, Deserialize)]
struct SectionSegmentsOutput {
    section_script_segmented_as_list: Vec<SectionSegmentEntry>,
}

#[derive(Debug, Deserialize)]
struct SectionSegmentEntry {
    section_script_segment: String,
}

/// Flatten nested talking point lists into plain strings
fn flatten_points(value: Value, points: &mut Vec<String>) {
    match value {
        Value::String(point) => {
            if !point.trim().is_empty() {
                points.push(point.trim().to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_points(item, points);
            }
        }
        Value::Null => {}
        other => points.push(other.to_string()),
    }
}

/// Turn the planned structure into outlines, rejecting empty or oversized plans
fn outlines_from(
    provider: &ProviderId,
    output: StructureOutput,
    max_sections: usize,
) -> Result<Vec<SectionOutline>, PipelineError> {
    let entries = output.sections_structure_list;
    if entries.is_empty() {
        return Err(PipelineError::provider(provider, "returned no sections"));
    }
    if entries.len() > max_sections {
        return Err(PipelineError::provider(
            provider,
            format!("planned {} sections, at most {} allowed", entries.len(), max_sections),
        ));
    }

    entries
        .into_iter()
        .map(|entry| {
            let mut talking_points = Vec::new();
            for value in entry.section_talking_points {
                flatten_points(value, &mut talking_points);
            }
            Ok(SectionOutline {
                name: non_empty(provider, "section_name", entry.section_name)?
                    .trim()
                    .to_string(),
                purpose: entry.section_purpose.trim().to_string(),
                directives: entry.section_directives,
                talking_points,
            })
        })
        .collect()
}

pub struct GenerateStructure;

#[async_trait]
impl Stage for GenerateStructure {
    fn name(&self) -> &'static str {
        "generate_structure"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Goal]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let provider = &brief.llm_provider;
        let payload = json!({
            "topic": brief.topic,
            "purpose": brief.purpose,
            "target_audience": brief.target_audience,
            "tone": brief.tone,
            "goal": required(self.name(), StateField::Goal, state.goal.as_ref())?,
            "max_sections": brief.max_sections,
        });
        let schema = json!({
            "type": "object",
            "properties": {
                "sections_structure_list": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "section_name": { "type": "string" },
                            "section_purpose": { "type": "string" },
                            "section_directives": { "type": "array", "items": { "type": "string" } },
                            "section_talking_points": { "type": "array" },
                        },
                        "required": ["section_name", "section_purpose"],
                    },
                },
            },
            "required": ["sections_structure_list"],
        });

        let output: StructureOutput =
            ask(ctx, provider, self.name(), STRUCTURE_INSTRUCTIONS, payload, schema).await?;
        let outlines = outlines_from(provider, output, brief.max_sections)?;

        info!(
            sections = outlines.len(),
            names = ?outlines.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            "Structure planned"
        );
        Ok(StateDelta {
            sections: Some(outlines.into_iter().map(Section::new).collect()),
            ..Default::default()
        })
    }
}

/// Write section scripts in order; each call sees everything written so far.
pub struct GenerateSectionScripts;

#[async_trait]
impl Stage for GenerateSectionScripts {
    fn name(&self) -> &'static str {
        "generate_section_scripts"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::Sections]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let provider = &brief.llm_provider;
        let mut sections = sections(self.name(), state)?.to_vec();
        let mut cumulative_script = String::new();

        for (index, section) in sections.iter_mut().enumerate() {
            let outline = &section.outline;
            let payload = json!({
                "topic": brief.topic,
                "purpose": brief.purpose,
                "target_audience": brief.target_audience,
                "tone": brief.tone,
                "goal": state.goal,
                "additional_requests": brief.additional_instructions,
                "cumulative_script": cumulative_script,
                "section_information": {
                    "section_name": outline.name,
                    "section_purpose": outline.purpose,
                    "section_directives": outline.directives,
                    "section_talking_points": outline.talking_points,
                },
            });

            let output: SectionScriptOutput = ask(
                ctx,
                provider,
                self.name(),
                SECTION_SCRIPT_INSTRUCTIONS,
                payload,
                string_schema("section_script"),
            )
            .await?;
            let script = non_empty(provider, "section_script", output.section_script)?
                .trim()
                .to_string();

            debug!(section = index, name = %outline.name, characters = script.chars().count(), "Section written");
            if !cumulative_script.is_empty() {
                cumulative_script.push_str("\n\n");
            }
            cumulative_script.push_str(&script);
            section.script = Some(script);
        }

        Ok(StateDelta {
            script: Some(cumulative_script),
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// Segment every section script in one fan-out group
pub struct SegmentSections;

#[async_trait]
impl Stage for SegmentSections {
    fn name(&self) -> &'static str {
        "segment_section_scripts"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::SectionScripts]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let provider = &state.brief.llm_provider;
        let llm = ctx.registry.llm(provider)?;
        let mut sections = sections(self.name(), state)?.to_vec();
        let schema = json!({
            "type": "object",
            "properties": {
                "section_script_segmented_as_list": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "section_script_segment": { "type": "string" } },
                        "required": ["section_script_segment"],
                    },
                },
            },
            "required": ["section_script_segmented_as_list"],
        });

        let mut tasks = Vec::with_capacity(sections.len());
        for (index, section) in sections.iter().enumerate() {
            let script = required(self.name(), StateField::SectionScripts, section.script.as_ref())?;
            let payload = json!({ "section_script": script });
            let llm = llm.clone();
            let schema = schema.clone();
            let provider = provider.clone();

            tasks.push(
                GenerationTask::new(TaskId::new(self.name(), index), provider.clone(), async move {
                    let value = llm.invoke(SECTION_SEGMENT_INSTRUCTIONS, &payload, &schema).await?;
                    let output: SectionSegmentsOutput = parse_output(&provider, value)?;
                    let segments: Vec<ScriptSegment> = output
                        .section_script_segmented_as_list
                        .into_iter()
                        .map(|entry| {
                            let text = entry.section_script_segment.trim();
                            ScriptSegment::new(text, text)
                        })
                        .collect();

                    if segments.is_empty() {
                        return Err(PipelineError::provider(
                            &provider,
                            format!("returned no segments for section {}", index),
                        ));
                    }
                    if let Some(position) = segments.iter().position(|s| s.character_length(false) == 0) {
                        return Err(PipelineError::provider(
                            &provider,
                            format!("segment {} of section {} is empty", position, index),
                        ));
                    }
                    Ok(segments)
                })
                .with_attempt(ctx.attempt),
            );
        }

        let segmented = ctx
            .governor
            .run_all_with(self.name(), tasks, ctx.settings.fan_out)
            .await?;
        for (section, segments) in sections.iter_mut().zip(segmented) {
            section.segments = Some(segments);
        }

        info!(
            segments = sections.iter().filter_map(|s| s.segments.as_ref()).map(Vec::len).sum::<usize>(),
            "Sections segmented"
        );
        Ok(StateDelta {
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// One narration per section, each with its own timing table
pub struct SynthesizeSections;

#[async_trait]
impl Stage for SynthesizeSections {
    fn name(&self) -> &'static str {
        "synthesize_sections"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::SectionSegments, StateField::VoiceId]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let voice_id = required(self.name(), StateField::VoiceId, state.voice_id.as_ref())?;
        let mut sections = sections(self.name(), state)?.to_vec();

        let mut expected_lengths = Vec::with_capacity(sections.len());
        let mut tasks = Vec::with_capacity(sections.len());
        for (index, section) in sections.iter().enumerate() {
            let segments = required(self.name(), StateField::SectionSegments, section.segments.as_ref())?;
            let text = aligner::narration_text(segments, brief.enhance_for_audio, state.timeline.join_width);
            expected_lengths.push(text.chars().count());
            tasks.push(narration_task(
                ctx,
                brief,
                TaskId::new(self.name(), index),
                text,
                voice_id.clone(),
            )?);
        }

        let narrations = ctx
            .governor
            .run_all_with(self.name(), tasks, ctx.settings.fan_out)
            .await?;

        for (index, ((section, (audio, timing)), expected)) in
            sections.iter_mut().zip(narrations).zip(expected_lengths).enumerate()
        {
            check_narration_length(expected, &timing)?;
            info!(
                section = index,
                audio = %audio.display(),
                characters = expected,
                narration_seconds = timing.narration_end(),
                "Section narration synthesized"
            );
            section.narration_audio = Some(audio);
            section.timing_table = Some(timing);
        }

        Ok(StateDelta {
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// Align each section's segments against that section's own timing table
pub struct AlignSections;

#[async_trait]
impl Stage for AlignSections {
    fn name(&self) -> &'static str {
        "align_sections"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::SectionSegments, StateField::SectionNarration]
    }

    async fn run(&self, state: &PipelineState, _ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let mut sections = sections(self.name(), state)?.to_vec();

        for (index, section) in sections.iter_mut().enumerate() {
            let segments = required(self.name(), StateField::SectionSegments, section.segments.as_ref())?;
            let table = required(self.name(), StateField::SectionNarration, section.timing_table.as_ref())?;

            let aligned = aligner::align_segments(
                table,
                segments,
                state.brief.enhance_for_audio,
                state.timeline.join_width,
            )?;
            debug!(
                section = index,
                segments = aligned.len(),
                end = aligned.last().and_then(|s| s.timing).map(|t| t.end_time),
                "Section aligned"
            );
            section.segments = Some(aligned);
        }

        Ok(StateDelta {
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// Plan images per segment of every section and describe them in one group
pub struct DescribeSectionImages;

#[async_trait]
impl Stage for DescribeSectionImages {
    fn name(&self) -> &'static str {
        "describe_section_images"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::SectionScripts, StateField::SectionTimings]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let mut sections = sections(self.name(), state)?.to_vec();

        let mut tasks = Vec::new();
        let mut plans_per_section = Vec::with_capacity(sections.len());
        for section in &sections {
            let script = required(self.name(), StateField::SectionScripts, section.script.as_ref())?;
            let segments = required(self.name(), StateField::SectionTimings, section.segments.as_ref())?;
            let timings: Vec<_> = segments.iter().filter_map(|s| s.timing).collect();
            if timings.len() != segments.len() {
                return Err(PipelineError::MissingInput {
                    stage: self.name().to_string(),
                    field: StateField::SectionTimings,
                });
            }

            let plans = partitioner::plan_all(&timings, &state.timeline);
            for (segment_index, (segment, plan)) in segments.iter().zip(&plans).enumerate() {
                let id = TaskId::new(self.name(), tasks.len()).for_segment(segment_index);
                tasks.push(image_prompt_task(ctx, brief, id, &segment.text, script, plan)?);
            }
            plans_per_section.push(plans);
        }

        let prompts = ctx
            .governor
            .run_all_with(self.name(), tasks, ctx.settings.fan_out)
            .await?;
        let prompts = regroup(prompts, plans_per_section.iter().map(Vec::len));

        for ((section, plans), prompts) in sections.iter_mut().zip(plans_per_section).zip(prompts) {
            section.image_plans = Some(plans);
            section.image_prompts = Some(prompts);
        }

        info!(
            sections = sections.len(),
            images = sections
                .iter()
                .flat_map(|s| s.image_plans.iter().flatten())
                .map(|p| p.image_count)
                .sum::<usize>(),
            "Section image prompts ready"
        );
        Ok(StateDelta {
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// Generate every image of every section in one fan-out group
pub struct GenerateSectionImages;

#[async_trait]
impl Stage for GenerateSectionImages {
    fn name(&self) -> &'static str {
        "generate_section_images"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::SectionImagePrompts]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let image = ctx.registry.image(&brief.image_provider)?;
        let mut sections = sections(self.name(), state)?.to_vec();

        let mut tasks = Vec::new();
        let mut segment_sizes = Vec::new();
        let mut section_sizes = Vec::with_capacity(sections.len());
        for section in &sections {
            let prompts = required(
                self.name(),
                StateField::SectionImagePrompts,
                section.image_prompts.as_ref(),
            )?;
            for (segment, segment_prompts) in prompts.iter().enumerate() {
                for prompt in segment_prompts {
                    let id = TaskId::new(self.name(), tasks.len()).for_segment(segment);
                    tasks.push(image_task(ctx, brief, &image, id, prompt));
                }
                segment_sizes.push(segment_prompts.len());
            }
            section_sizes.push(prompts.len());
        }

        let paths = ctx
            .governor
            .run_all_with(self.name(), tasks, ctx.settings.fan_out)
            .await?;
        let per_segment = regroup(paths, segment_sizes);
        let per_section = regroup(per_segment, section_sizes);

        for (section, image_paths) in sections.iter_mut().zip(per_section) {
            section.image_paths = Some(image_paths);
        }

        Ok(StateDelta {
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// Render every section's clips, then compose each section under its narration.
///
/// The motion pattern restarts at each section. The end buffer, when asked
/// for, follows the last section's clips.
pub struct AnimateSections;

#[async_trait]
impl Stage for AnimateSections {
    fn name(&self) -> &'static str {
        "animate_sections"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![
            StateField::SectionImagePrompts,
            StateField::SectionImagePaths,
            StateField::SectionNarration,
        ]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let brief = &state.brief;
        let end_buffer = end_buffer_clip(ctx, brief)?;
        let mut sections = sections(self.name(), state)?.to_vec();

        let mut jobs = Vec::new();
        let mut clip_counts = Vec::with_capacity(sections.len());
        for section in &sections {
            let image_paths = required(self.name(), StateField::SectionImagePaths, section.image_paths.as_ref())?;
            let plans = required(self.name(), StateField::SectionImagePrompts, section.image_plans.as_ref())?;
            if image_paths.len() != plans.len() {
                return Err(PipelineError::InvalidInput {
                    field: StateField::SectionImagePaths.to_string(),
                    reason: format!(
                        "section '{}' has {} segments of images for {} plans",
                        section.outline.name,
                        image_paths.len(),
                        plans.len()
                    ),
                });
            }

            let section_jobs = motion_jobs(ctx, brief.orientation, image_paths, plans)?;
            clip_counts.push(section_jobs.len());
            jobs.extend(section_jobs);
        }

        let clips = render_clips(self.name(), ctx, jobs).await?;
        let clips = regroup(clips, clip_counts);

        let last = sections.len().saturating_sub(1);
        for (index, (section, section_clips)) in sections.iter_mut().zip(clips).enumerate() {
            let audio = required(self.name(), StateField::SectionNarration, section.narration_audio.as_ref())?;
            let mut composed_clips = section_clips.clone();
            if index == last {
                composed_clips.extend(end_buffer.iter().cloned());
            }

            let video = compose_into(ctx, ArtifactCategory::Sections, &composed_clips, audio).await?;
            info!(section = index, video = %video.display(), clips = composed_clips.len(), "Section composed");

            section.clip_paths = Some(section_clips);
            section.video = Some(video);
        }

        Ok(StateDelta {
            sections: Some(sections),
            ..Default::default()
        })
    }
}

/// Join the section videos, each with its own audio, into the final video
pub struct AssembleSections;

#[async_trait]
impl Stage for AssembleSections {
    fn name(&self) -> &'static str {
        "assemble_sections"
    }

    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        vec![StateField::SectionVideos]
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError> {
        let videos = sections(self.name(), state)?
            .iter()
            .map(|s| required(self.name(), StateField::SectionVideos, s.video.as_ref()).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let output = ctx.artifacts.fresh_path(ArtifactCategory::Final, "mp4");
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let final_video = ctx.registry.assembler().concatenate(&videos, &output).await?;
        info!(final_video = %final_video.display(), sections = videos.len(), "Video assembled");

        Ok(StateDelta {
            final_video: Some(final_video),
            ..Default::default()
        })
    }
}

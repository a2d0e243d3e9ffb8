//! Command-line interface for reelsmith.
//!
//! Provides commands for producing a video from a brief, inspecting runs,
//! and trying the timeline math (image planning and alignment) offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use crate::adapters::ProviderRegistry;
use crate::config::{self, ResolvedConfig};
use crate::core::{
    aligner, partitioner, pipeline_for, ArtifactStore, Governor, Orchestrator, RenderPool,
    RunJournal, StageContext, StageSettings,
};
use crate::domain::{
    Brief, CharacterTimingTable, PipelineState, RunState, RunSummary, ScriptSegment,
    SegmentTiming, TimelineSettings,
};

/// reelsmith - Staged AI short-video pipeline
#[derive(Parser, Debug)]
#[command(name = "reelsmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produce a video from a brief
    Run {
        /// Brief file (YAML)
        brief: PathBuf,

        /// Write the debug report after assembly
        #[arg(long, env = "REELSMITH_DEBUG")]
        debug: bool,
    },

    /// Show how many images each segment duration gets
    Plan {
        /// Segment durations in seconds
        #[arg(required = true)]
        durations: Vec<f64>,

        /// Ideal seconds per image
        #[arg(long, default_value = "3.0")]
        ideal: f64,

        /// Shortest acceptable image duration
        #[arg(long, default_value = "2.0")]
        min: f64,
    },

    /// Align script segments to a character timing table
    Align {
        /// Timing table JSON ({characters, character_start_times_seconds, character_end_times_seconds})
        timing: PathBuf,

        /// Segments JSON ([{text, enhanced_text}])
        segments: PathBuf,

        /// Align the enhanced text instead of the raw text
        #[arg(long)]
        enhanced: bool,

        /// Characters between consecutive segments in the narrated text
        #[arg(long, default_value = "1")]
        join_width: usize,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { brief, debug } => run_brief(&brief, debug).await,
            Commands::Plan {
                durations,
                ideal,
                min,
            } => show_plan(&durations, ideal, min),
            Commands::Align {
                timing,
                segments,
                enhanced,
                join_width,
            } => align_files(&timing, &segments, enhanced, join_width),
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Wire the configured services into a stage context rooted at `artifacts`
fn build_context(cfg: &ResolvedConfig, artifacts: ArtifactStore) -> Result<StageContext> {
    let registry = ProviderRegistry::from_config(cfg).context("Failed to build provider registry")?;
    let governor = Governor::from_limits(cfg.provider_limits()).with_policy(cfg.fan_out);
    let render_pool = match cfg.render.workers {
        Some(workers) => RenderPool::new(workers),
        None => RenderPool::sized_to_host(),
    };

    Ok(StageContext::new(
        Arc::new(registry),
        Arc::new(governor),
        Arc::new(render_pool),
        artifacts,
        StageSettings::from_config(cfg),
    ))
}

/// Run the pipeline matching the brief's format
async fn run_brief(path: &Path, debug: bool) -> Result<()> {
    let cfg = config::config()?;

    let mut brief = Brief::from_file(path)?;
    brief.debug |= debug;

    let state = PipelineState::new(brief, cfg.timeline.clone())?;
    let run_id = state.run_id;

    let artifacts = ArtifactStore::new(cfg.output.join(run_id.to_string()));
    artifacts.ensure_dirs().await.with_context(|| {
        format!("Failed to create output directories under {}", artifacts.root().display())
    })?;
    let ctx = build_context(cfg, artifacts)?;
    let journal = RunJournal::open(&cfg.runs_dir(), run_id).await?;

    let pipeline = pipeline_for(state.brief.format);
    let orchestrator = Orchestrator::new(pipeline, ctx)
        .with_retry_policy(cfg.retry.clone())
        .with_journal(journal);

    info!(%run_id, brief = %path.display(), format = state.brief.format.as_str(), "Run started");

    let outcome = orchestrator.run(state).await;
    orchestrator.shutdown();

    match outcome {
        Ok(state) => {
            if let Some(video) = &state.final_video {
                println!("{}", video.display());
            }
            if let Some(report) = &state.debug_report {
                eprintln!("Debug report: {}", report.display());
            }
            eprintln!("\n[Run {} completed successfully]", run_id);
            Ok(())
        }
        Err(e) => {
            eprintln!("\n[Run {} failed: {}]", run_id, e);
            std::process::exit(1);
        }
    }
}

/// Print the image plan for each duration
fn show_plan(durations: &[f64], ideal: f64, min: f64) -> Result<()> {
    let settings = TimelineSettings {
        ideal_image_duration: ideal,
        min_image_duration: min,
        ..Default::default()
    };
    settings.validate()?;

    println!(
        "{:<10} {:<8} {:<10} {:<10}",
        "DURATION", "IMAGES", "IDEAL", "LAST"
    );
    println!("{}", "-".repeat(40));

    for &duration in durations {
        anyhow::ensure!(
            duration.is_finite() && duration > 0.0,
            "Segment duration must be positive, got {}",
            duration
        );
        let plan = partitioner::plan(duration, settings.ideal_image_duration, settings.min_image_duration);
        println!(
            "{:<10.2} {:<8} {:<10.2} {:<10.2}",
            duration, plan.image_count, plan.ideal_duration, plan.last_image_duration
        );
    }

    Ok(())
}

/// Align segments from files and print them as JSON
fn align_files(timing_path: &Path, segments_path: &Path, enhanced: bool, join_width: usize) -> Result<()> {
    let timing_json = std::fs::read_to_string(timing_path)
        .with_context(|| format!("Failed to read timing table: {}", timing_path.display()))?;
    let table: CharacterTimingTable = serde_json::from_str(&timing_json)
        .with_context(|| format!("Invalid timing table: {}", timing_path.display()))?;

    let segments_json = std::fs::read_to_string(segments_path)
        .with_context(|| format!("Failed to read segments: {}", segments_path.display()))?;
    let segments: Vec<ScriptSegment> = serde_json::from_str(&segments_json)
        .with_context(|| format!("Invalid segments: {}", segments_path.display()))?;

    let aligned = aligner::align_segments(&table, &segments, enhanced, join_width)?;
    let timings: Vec<SegmentTiming> = aligned.iter().filter_map(|s| s.timing).collect();

    println!("{}", serde_json::to_string_pretty(&aligned)?);
    eprintln!(
        "\n[{} segments, {:.2}s of narration]",
        timings.len(),
        timings.last().map(|t| t.end_time).unwrap_or_default()
    );

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let runs_dir = config::runs_dir()?;
    if !runs_dir.join(run_id.to_string()).exists() {
        anyhow::bail!("Run not found: {}", run_id);
    }

    let journal = RunJournal::open(&runs_dir, run_id).await?;
    let events = journal.replay().await?;
    let summary = RunSummary::from_events(&events)
        .with_context(|| format!("Run {} has no events", run_id))?;

    println!("Run ID: {}", summary.id);
    println!("State: {}", state_label(&summary.state));
    if let RunState::Failed { error } = &summary.state {
        println!("Error: {}", error);
    }
    println!("Started: {}", summary.started_at);
    if let Some(completed) = summary.completed_at {
        println!("Completed: {}", completed);
    }
    println!("\nStages:");
    for stage in &summary.stages {
        let duration = stage
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<22} {:<10} attempts={} {}",
            stage.name,
            format!("{:?}", stage.status),
            stage.attempts,
            duration
        );
        if let Some(error) = &stage.error {
            println!("    error: {}", error);
        }
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let runs_dir = config::runs_dir()?;
    let run_ids = RunJournal::list_runs(&runs_dir).await?;

    let mut summaries = Vec::new();
    for run_id in run_ids {
        let journal = RunJournal::open(&runs_dir, run_id).await?;
        if let Some(summary) = RunSummary::from_events(&journal.replay().await?) {
            summaries.push(summary);
        }
    }

    if summaries.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    // Newest first
    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    println!("{:<38} {:<12} {:<25}", "RUN ID", "STATE", "STARTED");
    println!("{}", "-".repeat(75));

    for summary in summaries.into_iter().take(limit) {
        println!(
            "{:<38} {:<12} {:<25}",
            summary.id,
            state_label(&summary.state),
            summary.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Failed { .. } => "failed",
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Reelsmith Configuration");
    println!("=======================");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (run journals): {}", cfg.home.display());
    println!("  Runs:                {}", cfg.runs_dir().display());
    println!("  Output (media):      {}", cfg.output.display());
    println!();
    println!("Timeline:");
    println!("  Ideal image duration: {}s", cfg.timeline.ideal_image_duration);
    println!("  Min image duration:   {}s", cfg.timeline.min_image_duration);
    println!("  Join width:           {}", cfg.timeline.join_width);
    println!();
    println!("Retry:");
    println!("  Max attempts: {}", cfg.retry.max_attempts);
    println!("  Fan-out:      {:?}", cfg.fan_out);
    println!();
    println!("Providers:");
    for (id, provider) in &cfg.providers {
        let rate = provider
            .limits
            .requests_per_period
            .map(|n| format!("{} per {}s", n, provider.limits.period_seconds))
            .unwrap_or_else(|| "unlimited".to_string());
        println!(
            "  {:<14} {:<6} concurrent={} rate={} timeout={}s{}",
            id,
            provider.kind.as_str(),
            provider.limits.max_concurrent,
            rate,
            provider.limits.call_timeout_seconds,
            if provider.command.is_some() { "" } else { " (no command)" }
        );
    }
    println!();
    println!("Render:");
    println!("  FPS:     {}", cfg.render.fps);
    println!(
        "  Workers: {}",
        cfg.render
            .workers
            .map(|w| w.to_string())
            .unwrap_or_else(|| format!("{} (host)", num_cpus::get()))
    );
    println!(
        "  Motion:  {}",
        cfg.render
            .motion_pattern
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Voices:  {}", cfg.voices.len());

    Ok(())
}

//! reelsmith - Staged AI short-video pipeline
//!
//! Turns a short brief into a narrated, image-illustrated vertical or
//! horizontal video: text stages write and segment a script, narration is
//! synthesized with per-character timing, segments are aligned to that
//! timing, each segment is split into a divmod-planned run of images, and
//! the rendered clips are assembled under the narration. Long-form briefs
//! plan sections first and run each one through the same steps before the
//! section videos are joined.
//!
//! # Architecture
//!
//! - Stages read one owned state record and return deltas
//! - Every provider call passes a per-provider rate limiter and semaphore
//! - Fan-out groups settle completely and report all failures together
//! - Stage transitions are journaled so runs can be inspected afterwards
//!
//! # Modules
//!
//! - `adapters`: Provider traits, subprocess providers, ffmpeg rendering
//! - `core`: Aligner, partitioner, governor, stages, orchestrator
//! - `domain`: Data structures (Brief, PipelineState, Event, RunSummary)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Produce a video
//! reelsmith run brief.yaml
//!
//! # Check run status
//! reelsmith status <run-id>
//!
//! # Try the image planner
//! reelsmith plan 10 11 13
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use core::{
    long_form_pipeline, pipeline_for, short_form_pipeline, Governor, Orchestrator, Pipeline,
};
pub use domain::{Brief, Event, EventType, PipelineState, RunState, RunSummary};
pub use error::{AggregateError, AlignmentError, PipelineError};

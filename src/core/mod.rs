//! Core orchestration logic.
//!
//! This module contains:
//! - Aligner and partitioner: narration timing to segment and image timing
//! - Governor: rate-limited, bounded fan-out of provider calls
//! - RenderPool: bounded blocking workers for motion rendering
//! - Pipeline and stages: the short-form and long-form chains
//! - RunJournal: append-only record of stage transitions
//! - Orchestrator: main execution engine

pub mod aligner;
pub mod artifacts;
pub mod governor;
pub mod journal;
pub mod long_form;
pub mod orchestrator;
pub mod partitioner;
pub mod pipeline;
pub mod render_pool;
pub mod stages;

// Re-export commonly used types
pub use artifacts::{ArtifactCategory, ArtifactStore};
pub use governor::{settle, FanOutPolicy, GenerationTask, Governor, ProviderGate, ProviderLimits, TaskMeta};
pub use journal::RunJournal;
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, RetryPolicy, Stage, StageContext, StageSettings};
pub use render_pool::RenderPool;
pub use long_form::long_form_pipeline;
pub use stages::{pipeline_for, short_form_pipeline};

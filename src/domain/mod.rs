//! Domain types for the reelsmith pipeline.
//!
//! This module contains the core data structures:
//! - State: the brief and the record threaded through stages
//! - Timing/Script/Plan: narration timing, segments, image plans
//! - Section: long-form sections and their per-section products
//! - Task: identifiers for fan-out work
//! - Events/Run: journal records and run reconstruction

pub mod events;
pub mod plan;
pub mod run;
pub mod script;
pub mod section;
pub mod state;
pub mod task;
pub mod timing;

// Re-export commonly used types
pub use events::{Event, EventType, StageStatus};
pub use plan::{ImagePlan, Motion};
pub use run::{RunState, RunSummary, StageRecord};
pub use script::{ScriptSegment, SegmentTiming};
pub use section::{Section, SectionOutline};
pub use state::{
    Brief, Orientation, PipelineState, StateDelta, StateField, TimelineSettings, VideoFormat,
};
pub use task::{ProviderId, TaskId};
pub use timing::CharacterTimingTable;

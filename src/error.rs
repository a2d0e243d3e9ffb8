//! Error taxonomy for pipeline runs.
//!
//! Every failure a stage can produce is a [`PipelineError`]. The orchestrator
//! consults [`PipelineError::is_retryable`] to decide whether a stage gets
//! another attempt; fan-out groups collapse their failures into a single
//! [`AggregateError`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{ProviderId, StateField, TaskId};

/// Errors raised while executing a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was scheduled before the fields it reads were produced
    #[error("Stage '{stage}' is missing required input '{field}'")]
    MissingInput { stage: String, field: StateField },

    /// An external provider call failed
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// An external provider call exceeded its per-call timeout
    #[error("Provider '{provider}' timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    /// Narration timing does not match the script segments
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    /// One or more tasks of a fan-out group failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The media assembler rejected its inputs
    #[error("Composition failed: {diagnostics}")]
    Composition { diagnostics: String },

    /// A seed field or intermediate value is unusable
    #[error("Invalid input '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// No strategy is registered under the requested provider id
    #[error("No provider registered for '{0}'")]
    UnknownProvider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sibling task failed and this one was cancelled before settling
    #[error("Task cancelled")]
    Cancelled,

    /// Work was submitted after the governor or render pool shut down
    #[error("Executor has been shut down")]
    ShutDown,

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// A stage exhausted its retry budget (or failed fatally)
    #[error("Stage '{stage}' failed after {attempts} attempt(s): {source}")]
    StageFailed {
        stage: String,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Build a provider error from any displayable message
    pub fn provider(provider: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether re-running the stage with the same input may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { .. }
            | Self::Timeout { .. }
            | Self::Aggregate(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::TaskPanicked(_) => true,

            Self::MissingInput { .. }
            | Self::Alignment(_)
            | Self::Composition { .. }
            | Self::InvalidInput { .. }
            | Self::Config(_)
            | Self::UnknownProvider(_)
            | Self::Cancelled
            | Self::ShutDown
            | Self::StageFailed { .. } => false,
        }
    }

    /// Number of attempts recorded on a terminal stage failure
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::StageFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The innermost error beneath any `StageFailed` wrappers
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Violations of the narration/segment length contract
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    #[error("Timing table is empty")]
    EmptyTable,

    #[error(
        "Timing table arrays differ in length: {characters} characters, {starts} start times, {ends} end times"
    )]
    RaggedTable {
        characters: usize,
        starts: usize,
        ends: usize,
    },

    #[error("Timing table entry {index} has a non-finite timestamp")]
    NonFiniteTime { index: usize },

    #[error("Segment {index} has zero length")]
    EmptySegment { index: usize },

    #[error("Segments need {required} characters but the timing table has {available}")]
    Overflow { required: usize, available: usize },

    #[error("Synthesized text has {expected} characters but the timing table has {actual} entries")]
    LengthMismatch { expected: usize, actual: usize },
}

/// One failed member of a fan-out group
#[derive(Debug)]
pub struct TaskFailure {
    pub id: TaskId,
    pub provider: ProviderId,
    /// Artifact the task was going to write, if any
    pub target: Option<PathBuf>,
    pub attempt: u32,
    pub error: PipelineError,
}

/// Every failure of a fan-out group, collected after all siblings settled
#[derive(Debug)]
pub struct AggregateError {
    pub group: String,
    pub total: usize,
    pub failures: Vec<TaskFailure>,
    /// Siblings cancelled after a failure (fail-fast groups only)
    pub cancelled: Vec<TaskId>,
}

impl AggregateError {
    /// Indices of the failed tasks, in submission order
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.id.index).collect()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} task(s) failed in '{}'",
            self.failures.len(),
            self.total,
            self.group
        )?;
        if !self.cancelled.is_empty() {
            write!(f, " ({} cancelled)", self.cancelled.len())?;
        }
        for failure in &self.failures {
            write!(
                f,
                "; {} via {} (attempt {}): {}",
                failure.id, failure.provider, failure.attempt, failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(PipelineError::provider("gemini", "503").is_retryable());
        assert!(PipelineError::Timeout {
            provider: "imagen".to_string(),
            after: Duration::from_secs(1),
        }
        .is_retryable());

        assert!(!PipelineError::MissingInput {
            stage: "align_segments".to_string(),
            field: StateField::TimingTable,
        }
        .is_retryable());
        assert!(!PipelineError::Alignment(AlignmentError::EmptyTable).is_retryable());
        assert!(!PipelineError::Composition {
            diagnostics: "bad codec".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_aggregate_display_lists_every_failure() {
        let aggregate = AggregateError {
            group: "generate_images".to_string(),
            total: 4,
            failures: vec![
                TaskFailure {
                    id: TaskId::new("generate_images", 1),
                    provider: ProviderId::from("imagen"),
                    target: None,
                    attempt: 1,
                    error: PipelineError::provider("imagen", "quota"),
                },
                TaskFailure {
                    id: TaskId::new("generate_images", 3),
                    provider: ProviderId::from("imagen"),
                    target: None,
                    attempt: 1,
                    error: PipelineError::provider("imagen", "blocked prompt"),
                },
            ],
            cancelled: Vec::new(),
        };

        let message = aggregate.to_string();
        assert!(message.starts_with("2 of 4 task(s) failed in 'generate_images'"));
        assert!(message.contains("quota"));
        assert!(message.contains("blocked prompt"));
        assert_eq!(aggregate.failed_indices(), vec![1, 3]);
    }

    #[test]
    fn test_root_unwraps_stage_failures() {
        let err = PipelineError::StageFailed {
            stage: "generate_goal".to_string(),
            attempts: 3,
            source: Box::new(PipelineError::provider("gemini", "overloaded")),
        };

        assert_eq!(err.attempts(), Some(3));
        assert!(matches!(err.root(), PipelineError::Provider { .. }));
    }
}

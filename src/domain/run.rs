//! Run outcome reconstruction from journal events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StageStatus};

/// What happened to one stage during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    /// Attempts started so far
    pub attempts: u32,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// Summary of a pipeline run, rebuilt from its journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Current state of the run
    pub state: RunState,

    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Stages in the order they first appeared
    pub stages: Vec<StageRecord>,
}

impl RunSummary {
    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut summary = Self {
            id: first_event.run_id,
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            stages: Vec::new(),
        };

        for event in events {
            summary.apply_event(event);
        }

        Some(summary)
    }

    /// Apply a single event to update the summary
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted => {
                if let Some(record) = self.record_mut(event) {
                    record.status = StageStatus::Running;
                    record.attempts = record.attempts.max(event.attempt);
                }
            }
            EventType::StageCompleted => {
                if let Some(record) = self.record_mut(event) {
                    record.status = StageStatus::Completed;
                    record.duration_ms = event.duration_ms;
                    record.error = None;
                }
            }
            EventType::StageRetrying => {
                if let Some(record) = self.record_mut(event) {
                    record.status = StageStatus::Running;
                    record.error = event.error.clone();
                }
            }
            EventType::StageFailed => {
                if let Some(record) = self.record_mut(event) {
                    record.status = StageStatus::Failed;
                    record.error = event.error.clone();
                }
            }
        }
    }

    fn record_mut(&mut self, event: &Event) -> Option<&mut StageRecord> {
        let name = event.stage.as_ref()?;
        let position = match self.stages.iter().position(|s| &s.name == name) {
            Some(position) => position,
            None => {
                self.stages.push(StageRecord {
                    name: name.clone(),
                    status: StageStatus::Pending,
                    attempts: 0,
                    duration_ms: None,
                    error: None,
                });
                self.stages.len() - 1
            }
        };
        self.stages.get_mut(position)
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Check if a specific stage is completed
    pub fn is_stage_completed(&self, name: &str) -> bool {
        self.stages
            .iter()
            .any(|s| s.name == name && s.status == StageStatus::Completed)
    }

    /// The stage record for a name, if it ran
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing (or crashed without a terminal event)
    #[default]
    Running,

    /// Completed successfully
    Completed,

    /// Failed with error
    Failed { error: String },
}

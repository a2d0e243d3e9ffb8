//! Pipeline definitions.
//!
//! A pipeline is an ordered chain of [`Stage`]s plus an optional debug stage
//! that runs after the chain when the brief asks for it. Stages read the
//! shared [`PipelineState`] and return a [`StateDelta`]; they never mutate
//! state directly.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::artifacts::ArtifactStore;
use super::governor::{FanOutPolicy, Governor};
use super::render_pool::RenderPool;
use crate::adapters::ProviderRegistry;
use crate::config::{RenderSettings, ResolvedConfig};
use crate::domain::{Brief, Motion, Orientation, PipelineState, StateDelta, StateField};
use crate::error::PipelineError;

/// One named step of a pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name (unique within pipeline)
    fn name(&self) -> &'static str;

    /// Fields that must be present before the stage runs
    fn requires(&self, _brief: &Brief) -> Vec<StateField> {
        Vec::new()
    }

    /// Override for the orchestrator-wide retry policy
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn run(&self, state: &PipelineState, ctx: &StageContext) -> Result<StateDelta, PipelineError>;
}

/// Settings stages read besides the state itself
#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Voice name -> provider voice id
    pub voices: BTreeMap<String, String>,
    pub motion_pattern: Vec<Motion>,
    pub fps: u32,
    pub end_buffer_portrait: Option<PathBuf>,
    pub end_buffer_landscape: Option<PathBuf>,
    pub fan_out: FanOutPolicy,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self::from_render(&RenderSettings::default(), BTreeMap::new(), FanOutPolicy::default())
    }
}

impl StageSettings {
    fn from_render(
        render: &RenderSettings,
        voices: BTreeMap<String, String>,
        fan_out: FanOutPolicy,
    ) -> Self {
        Self {
            voices,
            motion_pattern: render.motion_pattern.clone(),
            fps: render.fps,
            end_buffer_portrait: render.end_buffer_portrait.clone(),
            end_buffer_landscape: render.end_buffer_landscape.clone(),
            fan_out,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::from_render(&config.render, config.voices.clone(), config.fan_out)
    }

    pub fn end_buffer(&self, orientation: Orientation) -> Option<&PathBuf> {
        match orientation {
            Orientation::Portrait => self.end_buffer_portrait.as_ref(),
            Orientation::Landscape => self.end_buffer_landscape.as_ref(),
        }
    }
}

/// Shared services handed to every stage
#[derive(Clone)]
pub struct StageContext {
    pub registry: Arc<ProviderRegistry>,
    pub governor: Arc<Governor>,
    pub render_pool: Arc<RenderPool>,
    pub artifacts: ArtifactStore,
    pub settings: Arc<StageSettings>,
    /// Current stage attempt (1-based), stamped on fan-out task metadata
    pub attempt: u32,
}

impl StageContext {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        governor: Arc<Governor>,
        render_pool: Arc<RenderPool>,
        artifacts: ArtifactStore,
        settings: StageSettings,
    ) -> Self {
        Self {
            registry,
            governor,
            render_pool,
            artifacts,
            settings: Arc::new(settings),
            attempt: 1,
        }
    }

    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Close the governor and the render pool; later fan-out fails with `ShutDown`
    pub fn shutdown(&self) {
        self.governor.shutdown();
        self.render_pool.shutdown();
    }
}

/// A complete pipeline definition
pub struct Pipeline {
    /// Pipeline name (used in logs)
    pub name: String,

    /// Ordered list of stages to execute
    pub stages: Vec<Arc<dyn Stage>>,

    /// Runs after the chain when the brief's debug flag is set
    pub debug_stage: Option<Arc<dyn Stage>>,

    /// Field a successful run must have produced
    pub output: Option<StateField>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            debug_stage: None,
            output: None,
        }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn debug_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.debug_stage = Some(Arc::new(stage));
        self
    }

    pub fn produces(mut self, field: StateField) -> Self {
        self.output = Some(field);
        self
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::Config("Pipeline name cannot be empty".to_string()));
        }

        if self.stages.is_empty() {
            return Err(PipelineError::Config(format!(
                "Pipeline '{}' must have at least one stage",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let names = self
            .stages
            .iter()
            .chain(self.debug_stage.iter())
            .map(|s| s.name());
        for name in names {
            if !seen.insert(name) {
                return Err(PipelineError::Config(format!(
                    "Pipeline '{}' has duplicate stage '{}'",
                    self.name, name
                )));
            }
        }

        Ok(())
    }

    /// Stage names in execution order (debug stage last)
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .chain(self.debug_stage.iter())
            .map(|s| s.name())
            .collect()
    }
}

/// Retry policy for failed stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` attempts with no delay between them
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Stage for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, _: &PipelineState, _: &StageContext) -> Result<StateDelta, PipelineError> {
            Ok(StateDelta::default())
        }
    }

    #[test]
    fn test_pipeline_validation() {
        let pipeline = Pipeline::new("short_form")
            .stage(Named("first"))
            .stage(Named("second"))
            .debug_stage(Named("debug_report"));
        assert!(pipeline.validate().is_ok());
        assert_eq!(pipeline.stage_names(), vec!["first", "second", "debug_report"]);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let pipeline = Pipeline::new("dup").stage(Named("a")).stage(Named("a"));
        assert!(matches!(pipeline.validate(), Err(PipelineError::Config(_))));

        assert!(Pipeline::new("empty").validate().is_err());
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_immediate_policy() {
        let policy = RetryPolicy::immediate(4);
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }
}

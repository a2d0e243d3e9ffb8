//! Main orchestrator for pipeline execution.
//!
//! Runs stages in order over a single owned [`PipelineState`], checks each
//! stage's declared inputs, applies the retry policy, and records every stage
//! transition in the run journal.

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Event, EventType, PipelineState, StageStatus, StateField};
use crate::error::PipelineError;

use super::journal::{digest, RunJournal};
use super::pipeline::{Pipeline, RetryPolicy, Stage, StageContext};

/// Main pipeline orchestrator
pub struct Orchestrator {
    pipeline: Pipeline,
    ctx: StageContext,
    retry_policy: RetryPolicy,
    journal: Option<RunJournal>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, ctx: StageContext) -> Self {
        Self {
            pipeline,
            ctx,
            retry_policy: RetryPolicy::default(),
            journal: None,
        }
    }

    /// Policy for stages that don't override it
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Release the run's provider gates and render workers
    pub fn shutdown(&self) {
        info!(pipeline = %self.pipeline.name, "Shutting down run services");
        self.ctx.shutdown();
    }

    /// Execute the pipeline from a seed state
    #[instrument(skip(self, initial), fields(pipeline = %self.pipeline.name, run_id = %initial.run_id))]
    pub async fn run(&self, initial: PipelineState) -> Result<PipelineState, PipelineError> {
        self.pipeline.validate()?;
        let run_id = initial.run_id;
        info!("Starting pipeline run");

        let brief_digest = serde_json::to_vec(&initial.brief)
            .map(|bytes| digest(&bytes))
            .unwrap_or_default();
        self.record(Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!(
                "Pipeline '{}' started for '{}' (brief {})",
                self.pipeline.name, initial.brief.topic, brief_digest
            ),
            StageStatus::Running,
        ))
        .await?;

        match self.run_stages(initial).await {
            Ok(state) => {
                info!(final_video = ?state.final_video, "Run completed successfully");
                self.record(Event::new(
                    run_id,
                    None,
                    EventType::RunCompleted,
                    format!("Pipeline '{}' completed", self.pipeline.name),
                    StageStatus::Completed,
                ))
                .await?;
                Ok(state)
            }
            Err(e) => {
                error!(error = %e, "Run failed");
                self.record_failure(
                    Event::new(
                        run_id,
                        None,
                        EventType::RunFailed,
                        format!("Run failed: {}", e),
                        StageStatus::Failed,
                    )
                    .with_error(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_stages(&self, mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        for stage in &self.pipeline.stages {
            state = self.execute_stage(stage.as_ref(), state).await?;
        }

        if let Some(field) = self.pipeline.output {
            if !state.has(field) {
                return Err(PipelineError::MissingInput {
                    stage: self.pipeline.name.clone(),
                    field,
                });
            }
        }

        match &self.pipeline.debug_stage {
            Some(debug_stage) if state.brief.debug => {
                self.execute_stage(debug_stage.as_ref(), state).await
            }
            _ => Ok(state),
        }
    }

    /// Execute a stage with input checks and retry logic
    async fn execute_stage(
        &self,
        stage: &dyn Stage,
        state: PipelineState,
    ) -> Result<PipelineState, PipelineError> {
        let name = stage.name();

        if let Some(field) = missing_field(stage, &state) {
            let err = PipelineError::MissingInput {
                stage: name.to_string(),
                field,
            };
            error!(stage = name, %field, "Stage input missing");
            self.record_failure(
                Event::new(
                    state.run_id,
                    Some(name.to_string()),
                    EventType::StageFailed,
                    format!("Stage '{}' cannot start", name),
                    StageStatus::Failed,
                )
                .with_error(err.to_string()),
            )
            .await;
            return Err(err);
        }

        let policy = stage
            .retry_policy()
            .unwrap_or_else(|| self.retry_policy.clone());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let stage_start = Instant::now();

            self.record(
                Event::new(
                    state.run_id,
                    Some(name.to_string()),
                    EventType::StageStarted,
                    format!("Stage '{}' attempt {}", name, attempt),
                    StageStatus::Running,
                )
                .with_attempt(attempt),
            )
            .await?;
            debug!(stage = name, attempt, "Stage started");

            let ctx = self.ctx.for_attempt(attempt);
            let result = stage.run(&state, &ctx).await;
            let duration_ms = stage_start.elapsed().as_millis() as u64;

            match result {
                Ok(delta) => {
                    let fields: Vec<String> = delta.fields().iter().map(|f| f.to_string()).collect();
                    info!(stage = name, attempt, duration_ms, produced = ?fields, "Stage completed");

                    self.record(
                        Event::new(
                            state.run_id,
                            Some(name.to_string()),
                            EventType::StageCompleted,
                            format!("Stage '{}' completed in {}ms", name, duration_ms),
                            StageStatus::Completed,
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms),
                    )
                    .await?;

                    return Ok(state.merge(delta));
                }
                Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);

                    self.record(
                        Event::new(
                            state.run_id,
                            Some(name.to_string()),
                            EventType::StageRetrying,
                            format!("Stage '{}' failed, retrying in {:?}", name, delay),
                            StageStatus::Running,
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms)
                        .with_error(e.to_string()),
                    )
                    .await?;

                    warn!(
                        stage = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stage failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.record_failure(
                        Event::new(
                            state.run_id,
                            Some(name.to_string()),
                            EventType::StageFailed,
                            format!("Stage '{}' failed after {} attempt(s)", name, attempt),
                            StageStatus::Failed,
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms)
                        .with_error(e.to_string()),
                    )
                    .await;

                    error!(
                        stage = name,
                        attempt,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Stage failed permanently"
                    );

                    return Err(PipelineError::StageFailed {
                        stage: name.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    async fn record(&self, event: Event) -> Result<(), PipelineError> {
        match &self.journal {
            Some(journal) => journal.append(&event).await,
            None => Ok(()),
        }
    }

    /// Record a failure event without replacing the failure being reported
    async fn record_failure(&self, event: Event) {
        if let Err(e) = self.record(event).await {
            warn!(error = %e, "Could not journal failure event");
        }
    }
}

/// First declared input the state does not have yet
fn missing_field(stage: &dyn Stage, state: &PipelineState) -> Option<StateField> {
    stage
        .requires(&state.brief)
        .into_iter()
        .find(|field| !state.has(*field))
}

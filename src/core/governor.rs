//! Bounded-concurrency fan-out with per-provider rate limiting.
//!
//! Every provider id owns one [`ProviderGate`]: an optional token-bucket rate
//! limiter plus a semaphore bounding in-flight calls. A fan-out group submits
//! all of its tasks at once; each task takes a rate-limit token, then a
//! concurrency slot, then runs under the provider's call timeout. The group
//! settles only after every sibling has finished, and every failure is
//! reported together in one [`AggregateError`].
//!
//! The governor never retries. Retrying a failed group is the owning stage's
//! business (via the orchestrator).

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{ProviderId, TaskId};
use crate::error::{AggregateError, PipelineError, TaskFailure};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Concurrency and rate limits for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Maximum calls in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Calls allowed per `period_seconds` (unlimited when unset)
    #[serde(default)]
    pub requests_per_period: Option<u32>,

    #[serde(default = "default_period_seconds")]
    pub period_seconds: f64,

    /// Per-call timeout
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: f64,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_period_seconds() -> f64 {
    1.0
}
fn default_call_timeout() -> f64 {
    120.0
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            requests_per_period: None,
            period_seconds: default_period_seconds(),
            call_timeout_seconds: default_call_timeout(),
        }
    }
}

impl ProviderLimits {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    pub fn with_rate(mut self, requests: u32, period_seconds: f64) -> Self {
        self.requests_per_period = Some(requests);
        self.period_seconds = period_seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.call_timeout_seconds = seconds;
        self
    }

    /// Token-bucket quota: `n` calls per period, replenished evenly, burst of `n`
    pub fn quota(&self) -> Option<Quota> {
        let requests = NonZeroU32::new(self.requests_per_period?)?;
        if !(self.period_seconds > 0.0) || !self.period_seconds.is_finite() {
            return None;
        }
        let period = Duration::from_secs_f64(self.period_seconds);
        Quota::with_period(period / requests.get()).map(|q| q.allow_burst(requests))
    }

    pub fn call_timeout(&self) -> Duration {
        if self.call_timeout_seconds.is_finite() && self.call_timeout_seconds > 0.0 {
            Duration::from_secs_f64(self.call_timeout_seconds)
        } else {
            Duration::from_secs_f64(default_call_timeout())
        }
    }
}

/// Admission control for a single provider
pub struct ProviderGate {
    provider: ProviderId,
    limiter: Option<DirectLimiter>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    call_timeout: Duration,
}

impl ProviderGate {
    pub fn new(provider: ProviderId, limits: &ProviderLimits) -> Self {
        let max_concurrent = limits.max_concurrent.max(1);
        Self {
            provider,
            limiter: limits.quota().map(RateLimiter::direct),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            call_timeout: limits.call_timeout(),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_rate_limited(&self) -> bool {
        self.limiter.is_some()
    }

    /// Run `work` once admitted: rate-limit token, then a concurrency slot,
    /// then the call timeout.
    pub async fn admit<T, F>(&self, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::ShutDown)?;

        match tokio::time::timeout(self.call_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                provider: self.provider.to_string(),
                after: self.call_timeout,
            }),
        }
    }

    fn close(&self) {
        self.semaphore.close();
    }
}

/// Identity of a submitted task, kept for failure reporting
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub id: TaskId,
    pub provider: ProviderId,
    pub target: Option<PathBuf>,
    pub attempt: u32,
}

/// One unit of provider work
pub struct GenerationTask<T> {
    pub meta: TaskMeta,
    work: BoxFuture<'static, Result<T, PipelineError>>,
}

impl<T> GenerationTask<T> {
    pub fn new<F>(id: TaskId, provider: ProviderId, work: F) -> Self
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        Self {
            meta: TaskMeta {
                id,
                provider,
                target: None,
                attempt: 1,
            },
            work: work.boxed(),
        }
    }

    /// Artifact path this task writes
    pub fn with_target(mut self, target: PathBuf) -> Self {
        self.meta.target = Some(target);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.meta.attempt = attempt;
        self
    }
}

/// What a group does when one of its tasks fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Let every sibling settle, then report all failures
    #[default]
    WaitForAll,

    /// Cancel siblings still waiting or running after the first failure
    FailFast,
}

/// Process-wide fan-out executor
pub struct Governor {
    gates: HashMap<ProviderId, Arc<ProviderGate>>,
    policy: FanOutPolicy,
    shutdown: CancellationToken,
}

impl Governor {
    /// Build one gate per configured provider
    pub fn from_limits<I>(limits: I) -> Self
    where
        I: IntoIterator<Item = (ProviderId, ProviderLimits)>,
    {
        let gates = limits
            .into_iter()
            .map(|(provider, limits)| {
                let gate = ProviderGate::new(provider.clone(), &limits);
                (provider, Arc::new(gate))
            })
            .collect();

        Self {
            gates,
            policy: FanOutPolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn gate(&self, provider: &ProviderId) -> Option<Arc<ProviderGate>> {
        self.gates.get(provider).cloned()
    }

    /// Run a group with the governor's default policy
    pub async fn run_all<T>(
        &self,
        group: &str,
        tasks: Vec<GenerationTask<T>>,
    ) -> Result<Vec<T>, AggregateError>
    where
        T: Send + 'static,
    {
        self.run_all_with(group, tasks, self.policy).await
    }

    /// Run every task of a group concurrently and collect results in
    /// submission order.
    pub async fn run_all_with<T>(
        &self,
        group: &str,
        tasks: Vec<GenerationTask<T>>,
        policy: FanOutPolicy,
    ) -> Result<Vec<T>, AggregateError>
    where
        T: Send + 'static,
    {
        debug!(group, tasks = tasks.len(), ?policy, "Fanning out");

        let group_token = self.shutdown.child_token();
        let mut metas = Vec::with_capacity(tasks.len());
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let GenerationTask { meta, work } = task;
            let gate = self.gates.get(&meta.provider).cloned();
            let provider = meta.provider.clone();
            let group_token = group_token.clone();
            let shutdown = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                let outcome = match gate {
                    None => Err(PipelineError::UnknownProvider(provider.to_string())),
                    Some(_) if shutdown.is_cancelled() => Err(PipelineError::ShutDown),
                    Some(gate) => {
                        tokio::select! {
                            biased;
                            _ = group_token.cancelled() => {
                                if shutdown.is_cancelled() {
                                    Err(PipelineError::ShutDown)
                                } else {
                                    Err(PipelineError::Cancelled)
                                }
                            }
                            result = gate.admit(work) => result,
                        }
                    }
                };

                if policy == FanOutPolicy::FailFast
                    && matches!(&outcome, Err(e) if !matches!(e, PipelineError::Cancelled))
                {
                    group_token.cancel();
                }
                outcome
            }));
            metas.push(meta);
        }

        let joined = join_all(handles).await;
        let outcomes = metas
            .into_iter()
            .zip(joined)
            .map(|(meta, joined)| {
                let result = joined
                    .unwrap_or_else(|e| Err(PipelineError::TaskPanicked(e.to_string())));
                (meta, result)
            })
            .collect();

        settle(group, outcomes)
    }

    /// Cancel in-flight groups and refuse further work
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for gate in self.gates.values() {
            gate.close();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Collapse per-task outcomes into ordered values or one aggregate failure.
pub fn settle<T>(
    group: &str,
    outcomes: Vec<(TaskMeta, Result<T, PipelineError>)>,
) -> Result<Vec<T>, AggregateError> {
    let total = outcomes.len();
    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut cancelled = Vec::new();

    for (meta, result) in outcomes {
        match result {
            Ok(value) => values.push(value),
            Err(PipelineError::Cancelled) => cancelled.push(meta.id),
            Err(error) => {
                warn!(group, task = %meta.id, provider = %meta.provider, error = %error, "Task failed");
                failures.push(TaskFailure {
                    id: meta.id,
                    provider: meta.provider,
                    target: meta.target,
                    attempt: meta.attempt,
                    error,
                });
            }
        }
    }

    if failures.is_empty() && cancelled.is_empty() {
        debug!(group, total, "Group settled");
        return Ok(values);
    }

    Err(AggregateError {
        group: group.to_string(),
        total,
        failures,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_requires_positive_rate() {
        assert!(ProviderLimits::new(2).quota().is_none());
        assert!(ProviderLimits::new(2).with_rate(0, 9.0).quota().is_none());
        assert!(ProviderLimits::new(2).with_rate(1, 9.0).quota().is_some());
        assert!(ProviderLimits::new(2).with_rate(1, 0.0).quota().is_none());
    }

    #[test]
    fn test_gate_minimum_one_slot() {
        let gate = ProviderGate::new(ProviderId::from("flux"), &ProviderLimits::new(0));
        assert_eq!(gate.max_concurrent(), 1);
        assert!(!gate.is_rate_limited());
    }

    #[test]
    fn test_settle_orders_and_aggregates() {
        let meta = |i| TaskMeta {
            id: TaskId::new("g", i),
            provider: ProviderId::from("p"),
            target: None,
            attempt: 1,
        };

        let ok = settle("g", vec![(meta(0), Ok(10)), (meta(1), Ok(11))]).unwrap();
        assert_eq!(ok, vec![10, 11]);

        let err = settle(
            "g",
            vec![
                (meta(0), Ok(10)),
                (meta(1), Err(PipelineError::provider("p", "boom"))),
                (meta(2), Err(PipelineError::Cancelled)),
            ],
        )
        .unwrap_err();
        assert_eq!(err.total, 3);
        assert_eq!(err.failed_indices(), vec![1]);
        assert_eq!(err.cancelled.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_task_failure() {
        let governor = Governor::from_limits(vec![(ProviderId::from("known"), ProviderLimits::new(1))]);
        let tasks = vec![GenerationTask::new(
            TaskId::new("g", 0),
            ProviderId::from("missing"),
            async { Ok::<_, PipelineError>(()) },
        )];

        let err = governor.run_all("g", tasks).await.unwrap_err();
        assert!(matches!(
            err.failures[0].error,
            PipelineError::UnknownProvider(ref id) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_late_work() {
        let provider = ProviderId::from("p");
        let governor = Governor::from_limits(vec![(provider.clone(), ProviderLimits::new(1))]);
        governor.shutdown();
        assert!(governor.is_shut_down());

        let tasks = vec![GenerationTask::new(TaskId::new("g", 0), provider, async {
            Ok::<_, PipelineError>(1)
        })];
        let err = governor.run_all("g", tasks).await.unwrap_err();
        assert!(matches!(err.failures[0].error, PipelineError::ShutDown));
    }
}

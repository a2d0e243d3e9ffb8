//! Concurrency Governor Integration Tests
//!
//! Per-provider concurrency bounds, rate limiting, timeouts, result
//! ordering and aggregated failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reelsmith::core::{FanOutPolicy, GenerationTask, Governor, ProviderLimits};
use reelsmith::domain::{ProviderId, TaskId};
use reelsmith::error::PipelineError;
use tokio_test::{assert_err, assert_ok};

fn governor(provider: &str, limits: ProviderLimits) -> Governor {
    Governor::from_limits(vec![(ProviderId::from(provider), limits)])
}

/// Track the highest number of tasks observed running at once
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    async fn hold(&self, delay: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let governor = governor("imagen", ProviderLimits::new(3));
    let gauge = Arc::new(Gauge::default());

    let tasks = (0..12)
        .map(|i| {
            let gauge = Arc::clone(&gauge);
            GenerationTask::new(TaskId::new("images", i), ProviderId::from("imagen"), async move {
                gauge.hold(Duration::from_millis(20)).await;
                Ok(i)
            })
        })
        .collect();

    let results = governor.run_all("images", tasks).await.unwrap();

    assert_eq!(results, (0..12).collect::<Vec<_>>());
    assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_results_keep_submission_order() {
    let governor = governor("gemini", ProviderLimits::new(8));

    // Later tasks finish first
    let tasks = (0..5u64)
        .map(|i| {
            GenerationTask::new(TaskId::new("describe", i as usize), ProviderId::from("gemini"), async move {
                tokio::time::sleep(Duration::from_millis(50 - i * 10)).await;
                Ok(format!("segment {}", i))
            })
        })
        .collect();

    let results = governor.run_all("describe", tasks).await.unwrap();
    assert_eq!(
        results,
        vec!["segment 0", "segment 1", "segment 2", "segment 3", "segment 4"]
    );
}

#[tokio::test]
async fn test_separate_providers_have_separate_limits() {
    let governor = Governor::from_limits(vec![
        (ProviderId::from("gemini"), ProviderLimits::new(1)),
        (ProviderId::from("imagen"), ProviderLimits::new(1)),
    ]);
    let gauge = Arc::new(Gauge::default());

    let tasks = ["gemini", "imagen"]
        .iter()
        .enumerate()
        .map(|(i, provider)| {
            let gauge = Arc::clone(&gauge);
            GenerationTask::new(TaskId::new("mixed", i), ProviderId::from(*provider), async move {
                gauge.hold(Duration::from_millis(50)).await;
                Ok(())
            })
        })
        .collect();

    governor.run_all("mixed", tasks).await.unwrap();
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rate_limit_spaces_requests() {
    // Two per 200ms: burst of two, then one every 100ms
    let governor = governor("flux", ProviderLimits::new(8).with_rate(2, 0.2));
    assert!(governor.gate(&ProviderId::from("flux")).unwrap().is_rate_limited());

    let started = Instant::now();
    let tasks = (0..4)
        .map(|i| {
            GenerationTask::new(TaskId::new("images", i), ProviderId::from("flux"), async move {
                Ok(Instant::now())
            })
        })
        .collect();

    let admitted = governor.run_all("images", tasks).await.unwrap();
    let last = admitted.iter().max().unwrap();

    assert!(last.duration_since(started) >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_call_timeout_is_task_failure() {
    let governor = governor("elevenlabs", ProviderLimits::new(1).with_timeout(0.05));

    let tasks = vec![GenerationTask::new(
        TaskId::new("narration", 0),
        ProviderId::from("elevenlabs"),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        },
    )];

    let err = assert_err!(governor.run_all("narration", tasks).await);
    assert_eq!(err.failure_count(), 1);
    assert!(matches!(err.failures[0].error, PipelineError::Timeout { .. }));
    assert!(err.failures[0].error.is_retryable());
}

#[tokio::test]
async fn test_wait_for_all_reports_every_failure() {
    let governor = governor("imagen", ProviderLimits::new(4));
    let finished = Arc::new(AtomicUsize::new(0));

    let tasks = (0..6)
        .map(|i| {
            let finished = Arc::clone(&finished);
            GenerationTask::new(TaskId::new("images", i).for_segment(i / 2), ProviderId::from("imagen"), async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i % 3 == 1 {
                    Err(PipelineError::provider("imagen", format!("blocked prompt {}", i)))
                } else {
                    Ok(i)
                }
            })
            .with_target(format!("/out/images/{}.png", i).into())
        })
        .collect();

    let err = governor
        .run_all_with("images", tasks, FanOutPolicy::WaitForAll)
        .await
        .unwrap_err();

    // Every sibling ran to completion before the group settled
    assert_eq!(finished.load(Ordering::SeqCst), 6);
    assert_eq!(err.total, 6);
    assert_eq!(err.failed_indices(), vec![1, 4]);
    assert!(err.cancelled.is_empty());
    assert_eq!(err.failures[1].id.segment, Some(2));
    assert_eq!(
        err.failures[0].target.as_deref(),
        Some(std::path::Path::new("/out/images/1.png"))
    );
    assert!(err.to_string().contains("blocked prompt 4"));
}

#[tokio::test]
async fn test_fail_fast_cancels_running_siblings() {
    let governor = governor("imagen", ProviderLimits::new(4));

    let tasks = (0..4)
        .map(|i| {
            GenerationTask::new(TaskId::new("images", i), ProviderId::from("imagen"), async move {
                if i == 0 {
                    return Err(PipelineError::provider("imagen", "quota"));
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(i)
            })
        })
        .collect();

    let started = Instant::now();
    let err = governor
        .run_all_with("images", tasks, FanOutPolicy::FailFast)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(err.failed_indices(), vec![0]);
    assert_eq!(
        err.cancelled.iter().map(|id| id.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn test_empty_group_succeeds() {
    let governor = governor("imagen", ProviderLimits::new(1));
    let results = assert_ok!(governor.run_all::<()>("images", Vec::new()).await);
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_failed_task_leaves_sibling_artifacts() {
    let temp = tempfile::TempDir::new().unwrap();
    let governor = governor("imagen", ProviderLimits::new(2));
    let failing = 3;

    let tasks = (0..6)
        .map(|i| {
            let target = temp.path().join(format!("{}.png", i));
            let path = target.clone();
            GenerationTask::new(TaskId::new("images", i), ProviderId::from("imagen"), async move {
                if i == failing {
                    return Err(PipelineError::provider("imagen", "safety filter"));
                }
                tokio::fs::write(&path, b"png").await?;
                Ok(path)
            })
            .with_target(target)
            .with_attempt(2)
        })
        .collect();

    let err = assert_err!(governor.run_all("images", tasks).await);

    assert_eq!(err.failed_indices(), vec![failing]);
    let failure = &err.failures[0];
    assert_eq!(failure.provider, ProviderId::from("imagen"));
    assert_eq!(failure.attempt, 2);
    assert_eq!(failure.target.as_deref(), Some(temp.path().join("3.png").as_path()));

    for i in (0..6).filter(|&i| i != failing) {
        assert!(temp.path().join(format!("{}.png", i)).exists());
    }
    assert!(!temp.path().join("3.png").exists());
}

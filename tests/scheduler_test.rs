//! Scheduler behaviour against a real pipeline and against failing jobs

use anyhow::Result;
use async_trait::async_trait;
use autofix_agent::agent::{Planner, Sensor, SyntheticDetector};
use autofix_agent::config::RepositoryConfig;
use autofix_agent::learning::EpisodicStore;
use autofix_agent::orchestrator::{
    BoundedScheduler, RunOutcome, RunPipeline, RunReport, ScheduledJob, SchedulerConfig,
};
use autofix_agent::security::PolicyGate;
use autofix_agent::tools::{ChangeRequest, ChangeSubmitter};
use autofix_agent::types::{ChangeResult, FileSnapshot, SensedState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StaticSensor;

#[async_trait]
impl Sensor for StaticSensor {
    async fn sense(&self) -> Result<SensedState> {
        Ok(SensedState {
            git_head: "unknown".into(),
            files_snapshot: FileSnapshot {
                path: "svc/serializer.py".into(),
                content: Some("x = 1".into()),
                error: None,
            },
            ci_status: "unknown".into(),
        })
    }
}

#[derive(Default)]
struct CountingSubmitter {
    calls: AtomicUsize,
}

#[async_trait]
impl ChangeSubmitter for CountingSubmitter {
    async fn submit(&self, request: &ChangeRequest) -> Result<ChangeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChangeResult::ok(1, "https://example.com/pull/1", &request.head_branch))
    }
}

/// Panics on the second invocation, otherwise reports a failed run
#[derive(Default)]
struct Flaky {
    calls: AtomicUsize,
}

#[async_trait]
impl ScheduledJob for Flaky {
    async fn run(&self) -> RunReport {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 2 {
            panic!("collaborator exploded");
        }
        RunReport {
            run_id: uuid::Uuid::new_v4(),
            outcome: RunOutcome::Failed {
                error: "sensor call failed".into(),
            },
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_runs_then_stop_for_good() {
    let dir = tempfile::tempdir().unwrap();
    let store = EpisodicStore::open(dir.path().join("store.json")).unwrap().into_shared();
    let submitter = Arc::new(CountingSubmitter::default());
    let pipeline = RunPipeline::new(
        Arc::new(StaticSensor),
        Arc::new(SyntheticDetector::seeded(42)),
        Planner::new(None, Some(store.clone()), 2000),
        submitter.clone(),
        store.clone(),
        PolicyGate::default(),
        RepositoryConfig::default(),
    );

    let config = SchedulerConfig::from_minutes(5, Some(3)).unwrap();
    let mut scheduler = BoundedScheduler::new(Arc::new(pipeline), config);
    assert!(scheduler.start());
    scheduler.wait().await;

    assert_eq!(scheduler.run_count(), 3);
    assert_eq!(submitter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.read().await.len(), 3);

    // Interrupted and resumed: no 4th fire
    scheduler.stop().await;
    assert!(!scheduler.start());
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(submitter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.read().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failing_and_panicking_runs_do_not_stop_the_loop() {
    let job = Arc::new(Flaky::default());
    let config = SchedulerConfig::from_minutes(1, Some(4)).unwrap();
    let mut scheduler = BoundedScheduler::new(job.clone(), config);

    scheduler.start();
    scheduler.wait().await;

    assert_eq!(job.calls.load(Ordering::SeqCst), 4);
    assert_eq!(scheduler.run_count(), 4);
    assert!(!scheduler.is_running());
}

//! Bounded run scheduler
//!
//! Fires the pipeline once immediately and then on a fixed interval, never
//! overlapping runs, until `max_runs` is exhausted or a stop is requested.
//! A stop lets the in-flight run finish. The run counter outlives stop/start,
//! so an exhausted scheduler cannot be restarted.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::pipeline::{RunOutcome, RunPipeline, RunReport};
use crate::config::SchedulerSettings;
use crate::error::{AgentError, AgentResult};

/// Unit of work the scheduler fires
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    async fn run(&self) -> RunReport;
}

#[async_trait]
impl ScheduledJob for RunPipeline {
    async fn run(&self) -> RunReport {
        self.run_once().await
    }
}

/// Validated scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    interval: Duration,
    max_runs: Option<u64>,
}

impl SchedulerConfig {
    pub fn new(interval: Duration, max_runs: Option<u64>) -> AgentResult<Self> {
        if interval.is_zero() {
            return Err(AgentError::InvalidConfig("scheduler interval must be positive".to_string()));
        }
        if max_runs == Some(0) {
            return Err(AgentError::InvalidConfig("max_runs must be at least 1".to_string()));
        }
        Ok(Self { interval, max_runs })
    }

    pub fn from_minutes(interval_minutes: u64, max_runs: Option<u64>) -> AgentResult<Self> {
        Self::new(Duration::from_secs(interval_minutes.saturating_mul(60)), max_runs)
    }

    pub fn from_settings(settings: &SchedulerSettings) -> AgentResult<Self> {
        Self::from_minutes(settings.interval_minutes, settings.max_runs)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_runs(&self) -> Option<u64> {
        self.max_runs
    }

    fn exhausted(&self, runs: u64) -> bool {
        self.max_runs.is_some_and(|max| runs >= max)
    }
}

/// Repeatedly fires a [`ScheduledJob`]
pub struct BoundedScheduler {
    job: Arc<dyn ScheduledJob>,
    config: SchedulerConfig,
    runs: Arc<AtomicU64>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    finished: Option<watch::Receiver<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl BoundedScheduler {
    pub fn new(job: Arc<dyn ScheduledJob>, config: SchedulerConfig) -> Self {
        Self {
            job,
            config,
            runs: Arc::new(AtomicU64::new(0)),
            shutdown_tx: None,
            finished: None,
            handle: None,
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Attempts fired so far, across every start
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.finished.as_ref().is_some_and(|rx| !*rx.borrow())
    }

    /// Spawn the loop. Returns false when already running or `max_runs` is spent.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            warn!("Scheduler already running");
            return false;
        }
        if self.config.exhausted(self.run_count()) {
            warn!("Scheduler already completed {} run(s), not restarting", self.run_count());
            return false;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (finished_tx, finished_rx) = watch::channel(false);
        info!(
            "Starting scheduler: every {:?}, max runs {}",
            self.config.interval,
            self.config
                .max_runs
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        );

        self.handle = Some(tokio::spawn(run_loop(
            self.job.clone(),
            self.config,
            self.runs.clone(),
            shutdown_rx,
            finished_tx,
        )));
        self.shutdown_tx = Some(shutdown_tx);
        self.finished = Some(finished_rx);
        true
    }

    /// Prevent further fires and wait for the in-flight run. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // Err only when the loop already exited
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }

    /// Wait until the loop exits on its own (max runs) or is stopped elsewhere
    pub async fn wait(&self) {
        let Some(mut finished) = self.finished.clone() else {
            return;
        };
        let _ = finished.wait_for(|done| *done).await;
    }
}

async fn run_loop(
    job: Arc<dyn ScheduledJob>,
    config: SchedulerConfig,
    runs: Arc<AtomicU64>,
    mut shutdown_rx: broadcast::Receiver<()>,
    finished_tx: watch::Sender<bool>,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => break "stop requested",

            _ = interval.tick() => {
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                info!("scheduled run #{}", n);

                // Own task so a panic is contained to this run
                let job = job.clone();
                match tokio::spawn(async move { job.run().await }).await {
                    Ok(report) => log_report(n, &report),
                    Err(e) => error!("Scheduled run #{} crashed: {}", n, e),
                }

                if config.exhausted(n) {
                    break "max runs reached";
                }
            }
        }
    };

    info!("Scheduler stopped: {}", reason);
    let _ = finished_tx.send(true);
}

fn log_report(n: u64, report: &RunReport) {
    match &report.outcome {
        RunOutcome::Failed { error } => {
            error!("Scheduled run #{} ({}) failed: {}", n, report.run_id, error)
        }
        _ => info!("Scheduled run #{} ({}) finished: {}", n, report.run_id, report.status()),
    }
}

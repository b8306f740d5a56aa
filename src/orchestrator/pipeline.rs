//! Single-pass run pipeline
//!
//! sense -> detect -> decide -> plan -> (approve) -> submit -> record
//!
//! Every invocation ends in exactly one [`RunOutcome`]. Collaborator failures
//! degrade the run (no detection, fallback plan, error-status submission)
//! instead of aborting it; only a run that reaches submission is recorded.

use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::planner::Planner;
use crate::agent::reasoner::Detector;
use crate::agent::sensor::Sensor;
use crate::config::RepositoryConfig;
use crate::error::{AgentError, AgentResult};
use crate::learning::SharedEpisodicStore;
use crate::security::{ApprovalGate, PolicyGate};
use crate::tools::github::{ChangeRequest, ChangeSubmitter};
use crate::types::{ChangeResult, ChangeStatus, Plan, RunInsights, RunRecord, Validation};

/// Terminal state of one pipeline pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Submission attempted and the run recorded (`persisted` is false when the store write failed)
    Completed { record: Box<RunRecord>, persisted: bool },
    /// Nothing to fix this cycle
    NoDetection,
    RejectedByApproval { plan_id: String, reason: String },
    Failed { error: String },
}

/// Result of [`RunPipeline::run_once`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn status(&self) -> &'static str {
        match self.outcome {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::NoDetection => "no_detection",
            RunOutcome::RejectedByApproval { .. } => "rejected_by_approval",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    pub fn record(&self) -> Option<&RunRecord> {
        match &self.outcome {
            RunOutcome::Completed { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn insights(&self) -> Option<&RunInsights> {
        self.record().map(|r| &r.insights)
    }
}

/// Drives one detect-plan-gate-commit-learn cycle per call
pub struct RunPipeline {
    sensor: Arc<dyn Sensor>,
    detector: Arc<dyn Detector>,
    policy: PolicyGate,
    planner: Planner,
    approvals: ApprovalGate,
    submitter: Arc<dyn ChangeSubmitter>,
    store: SharedEpisodicStore,
    repository: RepositoryConfig,
}

impl RunPipeline {
    pub fn new(
        sensor: Arc<dyn Sensor>,
        detector: Arc<dyn Detector>,
        planner: Planner,
        submitter: Arc<dyn ChangeSubmitter>,
        store: SharedEpisodicStore,
        policy: PolicyGate,
        repository: RepositoryConfig,
    ) -> Self {
        Self {
            sensor,
            detector,
            planner: planner.with_gate_label(policy.gate_label()),
            policy,
            approvals: ApprovalGate::new(),
            submitter,
            store,
            repository,
        }
    }

    /// Share an approval gate (and its audit log) with the caller
    pub fn with_approval_gate(mut self, approvals: ApprovalGate) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn approvals(&self) -> &ApprovalGate {
        &self.approvals
    }

    pub fn store(&self) -> &SharedEpisodicStore {
        &self.store
    }

    /// Execute one pass. Never returns an error; failures are reported as [`RunOutcome::Failed`].
    pub async fn run_once(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        info!("Starting run {}", run_id);

        let outcome = match self.execute(run_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                RunOutcome::Failed { error: e.to_string() }
            }
        };
        RunReport { run_id, outcome }
    }

    async fn execute(&self, run_id: Uuid) -> AgentResult<RunOutcome> {
        let state = self
            .sensor
            .sense()
            .await
            .map_err(|e| AgentError::collaborator("sensor", format!("{:#}", e)))?;

        let detection = match self.detector.detect(&state).await {
            Ok(Some(detection)) => detection,
            Ok(None) => {
                info!("No issue detected");
                return Ok(RunOutcome::NoDetection);
            }
            Err(e) => {
                let err = AgentError::collaborator(self.detector.name(), format!("{:#}", e));
                warn!("{}; treating as no detection", err);
                return Ok(RunOutcome::NoDetection);
            }
        };
        info!("Detected: {}", detection.description);

        let decision = self
            .policy
            .apply(std::slice::from_ref(&detection))
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Policy("no decision for detection".to_string()))?;
        info!("Policy decision: {} at {} (score {})", decision.summary, decision.location, decision.score);

        let plan = self.planner.generate(&decision, &state).await;
        info!("Plan generated. Files: {}", plan.file_count());
        info!("Plan explanation: {}", plan.explanation);
        for (idx, step) in plan.steps.iter().enumerate() {
            info!("  Step {}: {}", idx + 1, step.description);
        }

        if self.policy.requires_approval(&plan) {
            let outcome = self.approvals.request_approval(&plan, self.policy.threshold());
            if !outcome.granted {
                let reason = outcome.reason.unwrap_or_default();
                info!("Run {} rejected by approval gate: {}", run_id, reason);
                return Ok(RunOutcome::RejectedByApproval {
                    plan_id: plan.plan_id,
                    reason,
                });
            }
        }

        info!("Using head branch: {}", self.repository.head_branch);
        let request = ChangeRequest {
            repo: self.repository.repo.clone(),
            base_branch: self.repository.base_branch.clone(),
            head_branch: self.repository.head_branch.clone(),
            title: pr_title(&plan),
            body: pr_body(run_id, &plan),
            change_sets: plan.files.clone(),
        };
        let change_result = match self.submitter.submit(&request).await {
            Ok(result) => result,
            Err(e) => {
                let err = AgentError::collaborator("submitter", format!("{:#}", e));
                warn!("{}", err);
                ChangeResult::error("submission_failed")
            }
        };

        let validation = Validation {
            passed: change_result.status == ChangeStatus::Ok,
        };
        let insights = RunInsights {
            detection_summary: detection.clone(),
            plan_explanation: plan.explanation.clone(),
            steps: plan.steps.clone(),
            risk_score: plan.estimated_risk_score,
            change: change_result.clone(),
            validation,
        };
        let record = RunRecord {
            run_id,
            timestamp: Utc::now(),
            state,
            detection,
            plan,
            change_result,
            validation,
            insights,
        };

        let persisted = match self.store.write().await.append(record.clone()) {
            Ok(()) => true,
            Err(e) => {
                error!("Run {} not persisted: {}", run_id, e);
                false
            }
        };

        info!(
            "Run {} completed. PR: {} (#{})",
            run_id,
            record.change_result.url.as_deref().unwrap_or("none"),
            record
                .change_result
                .identifier
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        info!("Validation passed: {}", validation.passed);
        info!("Risk score: {}", record.insights.risk_score);

        Ok(RunOutcome::Completed {
            record: Box::new(record),
            persisted,
        })
    }
}

pub fn pr_title(plan: &Plan) -> String {
    let goal = if plan.goal.trim().is_empty() {
        "improvement"
    } else {
        plan.goal.as_str()
    };
    format!("Auto-fix: {}", goal)
}

/// Markdown pull request description carrying the full plan
pub fn pr_body(run_id: Uuid, plan: &Plan) -> String {
    let mut body = format!(
        "**Automated Code Improvement**\n\nRun ID: `{}`\nGoal: {}\n\n## Summary\n{}\n\n## Steps\n",
        run_id, plan.goal, plan.explanation
    );
    for step in &plan.steps {
        let _ = writeln!(body, "- {}", step.description);
    }
    let _ = write!(body, "\n## Risk Score: {}\n", plan.estimated_risk_score);
    let full_plan = serde_json::to_string_pretty(plan).unwrap_or_else(|e| format!("<unavailable: {}>", e));
    let _ = write!(body, "\n## Full Plan\n```json\n{}\n```", full_plan);
    body
}

//! Plan approval gate
//!
//! Human-in-the-loop gate for plans whose estimated risk exceeds the threshold,
//! with an in-memory audit trail of every request.
//!
//! The gate applies the threshold literally: any plan above it is denied as
//! `requires_manual_review`. Since the pipeline only routes plans above the
//! same threshold here, every routed plan is rejected. There is no
//! out-of-band override.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::types::Plan;

/// Reason attached to plans denied for exceeding the threshold
pub const MANUAL_REVIEW_REASON: &str = "requires_manual_review";

/// Result of an approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalOutcome {
    fn granted() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }

    fn denied(reason: &str) -> Self {
        Self {
            granted: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Record of an approval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub plan_id: String,
    pub goal: String,
    pub risk_score: u8,
    pub threshold: i32,
    pub outcome: ApprovalOutcome,
    pub decided_at: DateTime<Utc>,
}

/// Approval gate with audit logging
#[derive(Clone, Default)]
pub struct ApprovalGate {
    audit_log: Arc<Mutex<Vec<ApprovalRecord>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `plan` may proceed without manual sign-off
    pub fn request_approval(&self, plan: &Plan, threshold: i32) -> ApprovalOutcome {
        info!(
            plan_id = %plan.plan_id,
            risk_score = plan.estimated_risk_score,
            threshold,
            "Approval requested"
        );

        let outcome = if i32::from(plan.estimated_risk_score) > threshold {
            ApprovalOutcome::denied(MANUAL_REVIEW_REASON)
        } else {
            ApprovalOutcome::granted()
        };

        self.record_decision(plan, threshold, &outcome);
        outcome
    }

    fn record_decision(&self, plan: &Plan, threshold: i32, outcome: &ApprovalOutcome) {
        self.log().push(ApprovalRecord {
            plan_id: plan.plan_id.clone(),
            goal: plan.goal.clone(),
            risk_score: plan.estimated_risk_score,
            threshold,
            outcome: outcome.clone(),
            decided_at: Utc::now(),
        });

        info!(
            plan_id = %plan.plan_id,
            granted = outcome.granted,
            reason = outcome.reason.as_deref().unwrap_or("-"),
            "Approval decision recorded"
        );
    }

    /// Every request seen so far, oldest first
    pub fn audit_log(&self) -> Vec<ApprovalRecord> {
        self.log().clone()
    }

    fn log(&self) -> MutexGuard<'_, Vec<ApprovalRecord>> {
        // The log is append-only, so a poisoned guard still holds consistent data
        self.audit_log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(score: u8) -> Plan {
        Plan {
            plan_id: "p1".into(),
            goal: "fix".into(),
            steps: vec![],
            risks: vec![],
            estimated_risk_score: score,
            estimated_time_minutes: 20,
            policy_gate: String::new(),
            files: vec![],
            explanation: String::new(),
            memory_context_used: false,
        }
    }

    #[test]
    fn test_denies_above_threshold() {
        let gate = ApprovalGate::new();
        let outcome = gate.request_approval(&plan(90), 70);
        assert!(!outcome.granted);
        assert_eq!(outcome.reason.as_deref(), Some(MANUAL_REVIEW_REASON));
    }

    #[test]
    fn test_grants_at_or_below_threshold() {
        let gate = ApprovalGate::new();
        assert!(gate.request_approval(&plan(70), 70).granted);
        assert!(gate.request_approval(&plan(10), 70).reason.is_none());
    }

    #[test]
    fn test_audit_log_records_every_request() {
        let gate = ApprovalGate::new();
        gate.request_approval(&plan(90), 70);
        gate.request_approval(&plan(20), 70);
        let log = gate.audit_log();
        assert_eq!(log.len(), 2);
        assert!(!log[0].outcome.granted);
        assert!(log[1].outcome.granted);
        assert_eq!(log[0].threshold, 70);
    }

    #[test]
    fn test_clones_share_audit_log() {
        let gate = ApprovalGate::new();
        let clone = gate.clone();
        clone.request_approval(&plan(99), 70);
        assert_eq!(gate.audit_log().len(), 1);
    }
}

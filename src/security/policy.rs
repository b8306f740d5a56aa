//! Policy gate
//!
//! Turns detections into decisions and decides whether a plan's estimated risk
//! needs human-in-the-loop review. Stateless; evaluation errors fail safe
//! toward requiring review.

use tracing::warn;

use crate::error::{AgentError, AgentResult};
use crate::types::{Decision, Detection, Plan, DEFAULT_DETECTION_SCORE};

/// Default HITL risk threshold
pub const DEFAULT_HITL_THRESHOLD: i32 = 70;

/// Maps detections to decisions and evaluates the risk threshold
#[derive(Debug, Clone, Copy)]
pub struct PolicyGate {
    hitl_threshold: i32,
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new(DEFAULT_HITL_THRESHOLD)
    }
}

impl PolicyGate {
    pub fn new(hitl_threshold: i32) -> Self {
        Self { hitl_threshold }
    }

    pub fn threshold(&self) -> i32 {
        self.hitl_threshold
    }

    /// One decision per detection, in order
    pub fn apply(&self, detections: &[Detection]) -> Vec<Decision> {
        detections.iter().map(Self::decide).collect()
    }

    fn decide(detection: &Detection) -> Decision {
        let summary = if detection.description.trim().is_empty() {
            "Auto action".to_string()
        } else {
            detection.description.clone()
        };
        Decision {
            summary,
            location: detection.location.clone(),
            score: detection.score.unwrap_or(DEFAULT_DETECTION_SCORE),
            detection: detection.clone(),
        }
    }

    /// Whether `plan` needs review at the configured threshold
    pub fn requires_approval(&self, plan: &Plan) -> bool {
        requires_approval(plan, self.hitl_threshold)
    }

    /// Label recorded on plans describing the gate in force
    pub fn gate_label(&self) -> String {
        format!("HITL_if_risk>{}", self.hitl_threshold)
    }
}

/// `plan.estimated_risk_score > threshold`; evaluation failure counts as "needs review"
pub fn requires_approval(plan: &Plan, threshold: i32) -> bool {
    match evaluate_risk(plan, threshold) {
        Ok(needs_review) => needs_review,
        Err(e) => {
            warn!("{}; requiring manual review", e);
            true
        }
    }
}

fn evaluate_risk(plan: &Plan, threshold: i32) -> AgentResult<bool> {
    if threshold < 0 {
        return Err(AgentError::Policy(format!(
            "threshold {} is below the 0-100 risk scale",
            threshold
        )));
    }
    if plan.estimated_risk_score > 100 {
        return Err(AgentError::Policy(format!(
            "plan {} carries out-of-range risk score {}",
            plan.plan_id, plan.estimated_risk_score
        )));
    }
    Ok(i32::from(plan.estimated_risk_score) > threshold)
}

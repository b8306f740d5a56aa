//! Shared types used across modules
//!
//! The run data model: what the detector finds, what the policy gate decides,
//! what the planner proposes, what the submitter reports and what the episodic
//! store keeps. Collaborator payloads are normalized here at the serde boundary
//! so that nothing downstream handles untyped maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Risk score used when a plan generator omits or garbles `estimated_risk_score`
pub const DEFAULT_RISK_SCORE: u8 = 30;

/// Score assigned to a decision whose detection carried none
pub const DEFAULT_DETECTION_SCORE: u8 = 50;

/// Coerce a loosely-typed score (number or numeric string) into 0..=100
pub fn coerce_score(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}

fn lenient_score<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_score))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

// ============ Detection / Decision ============

/// One candidate issue found in the sensed state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default, deserialize_with = "lenient_string")]
    pub issue_id: String,
    /// Confidence/severity, 0-100. Absent when the detector did not score it.
    #[serde(default, deserialize_with = "lenient_score", skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub classification: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, alias = "issue", deserialize_with = "lenient_string")]
    pub description: String,
}

/// Policy-annotated interpretation of a detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub summary: String,
    pub location: String,
    pub score: u8,
    /// Originating detection, kept for provenance
    pub detection: Detection,
}

// ============ Plan ============

/// Kind of plan step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CodeChange,
    Test,
    Review,
    Documentation,
    #[default]
    #[serde(other)]
    Other,
}

impl StepKind {
    /// Whether steps of this kind carry file content to commit
    pub fn is_code_change(&self) -> bool {
        matches!(self, StepKind::CodeChange)
    }
}

/// One unit of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, deserialize_with = "lenient_string")]
    pub step_id: String,
    #[serde(rename = "type", default)]
    pub kind: StepKind,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    /// Target file, when the generator names one explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refactored_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

impl Step {
    /// Code carried by this step, preferring full refactored content over a patch
    pub fn code(&self) -> Option<&str> {
        self.refactored_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.patch.as_deref().filter(|c| !c.trim().is_empty()))
    }
}

/// A risk the plan generator flagged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Risk {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, alias = "desc", deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_score", skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

/// A single file write within a change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(alias = "content")]
    pub patch: String,
}

/// Ordered group of file writes submitted together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(pub Vec<FileChange>);

impl ChangeSet {
    pub fn files(&self) -> &[FileChange] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<FileChange>> for ChangeSet {
    fn from(files: Vec<FileChange>) -> Self {
        Self(files)
    }
}

/// A proposed remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    pub estimated_risk_score: u8,
    #[serde(default = "default_time_minutes")]
    pub estimated_time_minutes: u32,
    #[serde(default)]
    pub policy_gate: String,
    #[serde(default)]
    pub files: Vec<ChangeSet>,
    #[serde(default)]
    pub explanation: String,
    /// Whether past successful fixes were fed to the generator
    #[serde(default, alias = "memory_context")]
    pub memory_context_used: bool,
}

fn default_time_minutes() -> u32 {
    20
}

impl Plan {
    /// Number of file writes across every change set
    pub fn file_count(&self) -> usize {
        self.files.iter().map(ChangeSet::len).sum()
    }

    /// First file write of the first non-empty change set
    pub fn first_change(&self) -> Option<&FileChange> {
        self.files.iter().find_map(|set| set.files().first())
    }
}

// ============ Submission ============

/// Outcome tag reported by the change submitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Ok,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

impl ChangeStatus {
    /// Both historical spellings of success count
    pub fn is_success(&self) -> bool {
        matches!(self, ChangeStatus::Ok | ChangeStatus::Success)
    }
}

/// What the change submitter did with a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub status: ChangeStatus,
    /// Pull request number assigned by the host
    #[serde(default, alias = "pr_number", skip_serializing_if = "Option::is_none")]
    pub identifier: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChangeResult {
    pub fn ok(identifier: u64, url: impl Into<String>, head_branch: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Ok,
            identifier: Some(identifier),
            url: Some(url.into()),
            head_branch: Some(head_branch.into()),
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Error,
            identifier: None,
            url: None,
            head_branch: None,
            reason: Some(reason.into()),
        }
    }
}

// ============ Run record ============

/// Snapshot of the monitored target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the sensor saw at the start of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensedState {
    pub git_head: String,
    pub files_snapshot: FileSnapshot,
    pub ci_status: String,
}

impl SensedState {
    /// Target file content, empty when the read failed
    pub fn content(&self) -> &str {
        self.files_snapshot.content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub passed: bool,
}

/// Derived summary of a run, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInsights {
    pub detection_summary: Detection,
    pub plan_explanation: String,
    pub steps: Vec<Step>,
    pub risk_score: u8,
    pub change: ChangeResult,
    pub validation: Validation,
}

/// Persisted outcome of one pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub state: SensedState,
    pub detection: Detection,
    pub plan: Plan,
    #[serde(alias = "pr")]
    pub change_result: ChangeResult,
    pub validation: Validation,
    pub insights: RunInsights,
}

impl RunRecord {
    pub fn succeeded(&self) -> bool {
        self.change_result.status.is_success()
    }
}

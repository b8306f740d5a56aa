//! Plan generation with episodic few-shot retrieval
//!
//! Builds a remediation plan for a decision. Past successful fixes for the same
//! issue family are pulled from the episodic store and appended to the prompt.
//! Generation never fails: an unavailable model or an unparseable answer
//! degrades to a built-in template plan.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::llm::{extract_json, CompletionProvider};
use crate::learning::SharedEpisodicStore;
use crate::types::{
    coerce_score, ChangeSet, Decision, FileChange, Plan, Risk, SensedState, Step, StepKind,
    DEFAULT_RISK_SCORE,
};

/// Max chars of the goal used as the issue-family lookup key
pub const ISSUE_KEY_CHARS: usize = 50;
/// Past fixes included in a prompt
pub const LEARNING_EXAMPLES: usize = 2;
/// Max chars of code quoted per past fix
pub const EXAMPLE_CODE_CHARS: usize = 300;

const STORE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TIME_MINUTES: u32 = 20;
const FALLBACK_PATH: &str = "improved.py";
const GENERATED_PATH: &str = "refactored_code.py";

const FALLBACK_CODE: &str = r#"'''Improved module with error handling.'''

class Serializer:
    def serialize(self, data):
        if data is None:
            return None
        try:
            return {"status": "ok", "data": data}
        except Exception as e:
            raise ValueError(f"Serialization failed: {e}")
"#;

/// Shape the model is asked to return
#[derive(Debug, Deserialize)]
struct PlanDraft {
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    risks: Vec<Risk>,
    #[serde(default)]
    estimated_risk_score: Option<Value>,
    #[serde(default)]
    estimated_time_minutes: Option<Value>,
}

/// Portion of the goal before the first colon, bounded in length
pub fn issue_key(goal: &str) -> &str {
    let head = goal.split(':').next().unwrap_or(goal);
    crate::truncate_safe(head, ISSUE_KEY_CHARS)
}

/// File portion of a `path:line` location
fn location_path(location: &str) -> Option<&str> {
    location.split(':').next().map(str::trim).filter(|p| !p.is_empty())
}

/// Generates plans, optionally informed by the episodic store
pub struct Planner {
    provider: Option<Arc<dyn CompletionProvider>>,
    store: Option<SharedEpisodicStore>,
    max_tokens: u32,
    gate_label: String,
}

impl Planner {
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        store: Option<SharedEpisodicStore>,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            store,
            max_tokens,
            gate_label: crate::security::PolicyGate::default().gate_label(),
        }
    }

    /// Label recorded on every plan describing the gate in force
    pub fn with_gate_label(mut self, label: impl Into<String>) -> Self {
        self.gate_label = label.into();
        self
    }

    /// Produce a plan for `decision`. Never fails.
    pub async fn generate(&self, decision: &Decision, context: &SensedState) -> Plan {
        let plan_id = Uuid::new_v4().to_string();
        let goal = Self::goal_for(decision);
        let location = decision.location.as_str();

        let memory_context = match self.learning_context(&goal).await {
            Ok(block) => block,
            Err(e) => {
                warn!("Memory query failed: {}", e);
                String::new()
            }
        };
        let memory_used = !memory_context.is_empty();

        if let Some(provider) = &self.provider {
            let prompt = Self::prompt(&goal, location, context, &memory_context);
            match self.request_plan(provider.as_ref(), &prompt).await {
                Ok(draft) => {
                    info!("Generated plan {} with {} step(s)", plan_id, draft.steps.len());
                    return self.plan_from_draft(plan_id, goal, location, draft, memory_used);
                }
                Err(e) => warn!("Plan generation failed, using fallback plan: {:#}", e),
            }
        } else {
            debug!("No completion provider configured, using fallback plan");
        }

        self.fallback_plan(plan_id, goal, location, memory_used)
    }

    fn goal_for(decision: &Decision) -> String {
        [decision.summary.as_str(), decision.detection.description.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("Auto fix")
            .to_string()
    }

    /// Prompt augmentation block built from past successful fixes
    async fn learning_context(&self, goal: &str) -> Result<String> {
        let Some(store) = &self.store else {
            return Ok(String::new());
        };
        let key = issue_key(goal);
        let store = tokio::time::timeout(STORE_LOCK_TIMEOUT, store.read())
            .await
            .context("Timed out waiting for the episodic store")?;

        let examples = store.recent_successful_examples(key, LEARNING_EXAMPLES);
        if examples.is_empty() {
            return Ok(String::new());
        }
        let success_rate = store.statistics(key).success_rate;

        let mut block = String::from("\n\nPAST SUCCESSFUL FIXES:\n");
        for (i, example) in examples.iter().enumerate() {
            let _ = write!(block, "\nExample {}:\n", i + 1);
            if let Some(set) = example.plan.files.first() {
                for change in set.files() {
                    let code = crate::truncate_safe(&change.patch, EXAMPLE_CODE_CHARS);
                    if !code.is_empty() {
                        let _ = write!(block, "```\n{}\n```\n", code);
                    }
                }
            }
            let _ = writeln!(block, "(Success rate: {:.0}%)", success_rate * 100.0);
        }
        info!("Using {} learned example(s) for '{}'", examples.len(), key);
        Ok(block)
    }

    fn prompt(goal: &str, location: &str, context: &SensedState, memory_context: &str) -> String {
        format!(
            r#"You are an expert code fixer. Generate a repair plan.

Issue: {goal}
Location: {location}
Repository head: {head}
{memory_context}

Return JSON with this structure:
{{
  "steps": [
    {{"step_id": "s1", "type": "code_change", "description": "fix", "refactored_code": "complete corrected file content"}}
  ],
  "estimated_time_minutes": 15,
  "risks": [{{"id": "r1", "desc": "risk", "score": 20}}],
  "estimated_risk_score": 25
}}

CRITICAL: Include actual working code in 'refactored_code' with error handling.
Return ONLY valid JSON, no markdown."#,
            head = context.git_head,
        )
    }

    async fn request_plan(&self, provider: &dyn CompletionProvider, prompt: &str) -> Result<PlanDraft> {
        let response = provider
            .complete(prompt, self.max_tokens)
            .await
            .context("Plan completion failed")?;
        serde_json::from_str(extract_json(&response))
            .with_context(|| format!("Malformed plan: {}", crate::truncate_safe(&response, 200)))
    }

    fn plan_from_draft(
        &self,
        plan_id: String,
        goal: String,
        location: &str,
        draft: PlanDraft,
        memory_used: bool,
    ) -> Plan {
        let default_path = location_path(location).unwrap_or(GENERATED_PATH);
        let files: Vec<FileChange> = draft
            .steps
            .iter()
            .filter(|step| step.kind.is_code_change())
            .filter_map(|step| {
                step.code().map(|code| FileChange {
                    path: step.path.clone().unwrap_or_else(|| default_path.to_string()),
                    patch: code.to_string(),
                })
            })
            .collect();

        let estimated_risk_score = draft
            .estimated_risk_score
            .as_ref()
            .and_then(coerce_score)
            .unwrap_or(DEFAULT_RISK_SCORE);
        let estimated_time_minutes = draft
            .estimated_time_minutes
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|m| u32::try_from(m).ok())
            .unwrap_or(DEFAULT_TIME_MINUTES);

        let explanation = explain(&goal, &draft.steps, memory_used);
        Plan {
            plan_id,
            goal,
            steps: draft.steps,
            risks: draft.risks,
            estimated_risk_score,
            estimated_time_minutes,
            policy_gate: self.gate_label.clone(),
            files: if files.is_empty() { vec![] } else { vec![ChangeSet(files)] },
            explanation,
            memory_context_used: memory_used,
        }
    }

    fn fallback_plan(&self, plan_id: String, goal: String, location: &str, memory_used: bool) -> Plan {
        let path = location_path(location).unwrap_or(FALLBACK_PATH).to_string();
        let steps = vec![Step {
            step_id: "s1".to_string(),
            kind: StepKind::CodeChange,
            description: "Apply improvements".to_string(),
            path: None,
            refactored_code: Some(FALLBACK_CODE.to_string()),
            patch: None,
        }];
        let explanation = explain(&goal, &steps, memory_used);
        Plan {
            plan_id,
            goal,
            steps,
            risks: vec![Risk {
                id: "r1".to_string(),
                description: "compatibility risk".to_string(),
                score: Some(DEFAULT_RISK_SCORE),
            }],
            estimated_risk_score: DEFAULT_RISK_SCORE,
            estimated_time_minutes: DEFAULT_TIME_MINUTES,
            policy_gate: self.gate_label.clone(),
            files: vec![ChangeSet(vec![FileChange {
                path,
                patch: FALLBACK_CODE.to_string(),
            }])],
            explanation,
            memory_context_used: memory_used,
        }
    }
}

fn explain(goal: &str, steps: &[Step], memory_used: bool) -> String {
    let descriptions: Vec<&str> = steps
        .iter()
        .map(|s| s.description.trim())
        .filter(|d| !d.is_empty())
        .collect();
    let marker = if memory_used {
        "[Using learned patterns]"
    } else {
        "[No learned patterns]"
    };
    format!(
        "Planned changes for: {}. Steps: {} {}",
        goal,
        descriptions.join("; "),
        marker
    )
}

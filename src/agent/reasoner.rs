//! Issue detection
//!
//! The pipeline asks a [`Detector`] for at most one issue per run. The LLM
//! detector reads the sensed file; the synthetic detector stands in when no
//! model is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::llm::{extract_json, CompletionProvider};
use crate::types::{Detection, SensedState};

/// Max chars of file content sent to the detection prompt
const DETECT_CONTENT_CHARS: usize = 500;

/// Finds zero or one issue in a sensed state
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, state: &SensedState) -> Result<Option<Detection>>;

    fn name(&self) -> &'static str;
}

/// Asks the language model for a single issue
pub struct LlmDetector {
    provider: Arc<dyn CompletionProvider>,
    max_tokens: u32,
}

impl LlmDetector {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_tokens: u32) -> Self {
        Self { provider, max_tokens }
    }

    fn prompt(state: &SensedState) -> String {
        format!(
            r#"Analyze this code and detect ONE issue to fix:

{}

Return JSON: {{"issue_id": "ISSUE-1", "score": 85, "classification": "bug", "location": "{}", "description": "Brief issue description"}}

Only valid JSON, no markdown."#,
            crate::truncate_safe(state.content(), DETECT_CONTENT_CHARS),
            state.files_snapshot.path
        )
    }
}

#[async_trait]
impl Detector for LlmDetector {
    async fn detect(&self, state: &SensedState) -> Result<Option<Detection>> {
        let response = self
            .provider
            .complete(&Self::prompt(state), self.max_tokens)
            .await
            .context("Detection completion failed")?;

        let detection: Detection = serde_json::from_str(extract_json(&response))
            .with_context(|| format!("Malformed detection: {}", crate::truncate_safe(&response, 200)))?;

        if detection.description.trim().is_empty() && detection.issue_id.trim().is_empty() {
            debug!("Model reported an empty detection");
            return Ok(None);
        }
        Ok(Some(detection))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Canned detections for running without a model
pub struct SyntheticDetector {
    rng: Mutex<StdRng>,
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl SyntheticDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic sequence for tests and reproducible demos
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pick(&self, location: &str) -> Detection {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if rng.random_bool(0.5) {
            Detection {
                issue_id: format!("ISSUE-DEMO-{}", rng.random_range(1..=100)),
                score: Some(85),
                classification: "bug".to_string(),
                location: location.to_string(),
                description: "Demo detection: investigate serializer".to_string(),
            }
        } else {
            Detection {
                issue_id: "ISSUE-NULL-POINTER".to_string(),
                score: Some(75),
                classification: "bug".to_string(),
                location: location.to_string(),
                description: "Detected possible null pointer".to_string(),
            }
        }
    }
}

#[async_trait]
impl Detector for SyntheticDetector {
    async fn detect(&self, state: &SensedState) -> Result<Option<Detection>> {
        Ok(Some(self.pick(&state.files_snapshot.path)))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

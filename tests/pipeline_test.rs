//! End-to-end runs of the pipeline with in-process collaborators

use anyhow::Result;
use async_trait::async_trait;
use autofix_agent::agent::{CompletionProvider, Detector, Planner, Sensor};
use autofix_agent::config::RepositoryConfig;
use autofix_agent::learning::{EpisodicStore, SharedEpisodicStore};
use autofix_agent::orchestrator::{RunOutcome, RunPipeline};
use autofix_agent::security::{ApprovalGate, PolicyGate};
use autofix_agent::tools::{ChangeRequest, ChangeSubmitter, GitHubSubmitter};
use autofix_agent::types::{ChangeResult, Detection, FileSnapshot, SensedState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct StaticSensor;

#[async_trait]
impl Sensor for StaticSensor {
    async fn sense(&self) -> Result<SensedState> {
        Ok(SensedState {
            git_head: "abc123".into(),
            files_snapshot: FileSnapshot {
                path: "f.py".into(),
                content: Some("def serialize(data):\n    return data.value\n".into()),
                error: None,
            },
            ci_status: "unknown".into(),
        })
    }
}

struct StaticDetector;

#[async_trait]
impl Detector for StaticDetector {
    async fn detect(&self, _state: &SensedState) -> Result<Option<Detection>> {
        Ok(Some(Detection {
            issue_id: "ISSUE-1".into(),
            score: Some(85),
            classification: "bug".into(),
            location: "f.py".into(),
            description: "null pointer".into(),
        }))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Answers every plan request with the same JSON and keeps the prompts
struct ScriptedModel {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedModel {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

#[derive(Default)]
struct RecordingSubmitter {
    calls: AtomicUsize,
    requests: Mutex<Vec<ChangeRequest>>,
}

#[async_trait]
impl ChangeSubmitter for RecordingSubmitter {
    async fn submit(&self, request: &ChangeRequest) -> Result<ChangeResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChangeResult::ok(
            n,
            format!("https://github.com/{}/pull/{}", request.repo, n),
            &request.head_branch,
        ))
    }
}

fn open_store(dir: &tempfile::TempDir) -> SharedEpisodicStore {
    EpisodicStore::open(dir.path().join("episodic_store.json"))
        .unwrap()
        .into_shared()
}

fn pipeline(
    store: SharedEpisodicStore,
    model: Option<Arc<ScriptedModel>>,
    submitter: Arc<dyn ChangeSubmitter>,
) -> RunPipeline {
    let provider = model.map(|m| m as Arc<dyn CompletionProvider>);
    RunPipeline::new(
        Arc::new(StaticSensor),
        Arc::new(StaticDetector),
        Planner::new(provider, Some(store.clone()), 2000),
        submitter,
        store,
        PolicyGate::new(70),
        RepositoryConfig::default(),
    )
}

#[tokio::test]
async fn test_low_risk_fallback_plan_goes_straight_to_submission() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let submitter = Arc::new(RecordingSubmitter::default());
    let approvals = ApprovalGate::new();

    let pipeline = pipeline(store.clone(), None, submitter.clone()).with_approval_gate(approvals.clone());
    let report = pipeline.run_once().await;

    let record = report.record().expect("run should complete");
    assert_eq!(record.detection.description, "null pointer");
    assert_eq!(record.plan.goal, "null pointer");
    assert_eq!(record.plan.estimated_risk_score, 30);
    assert!(record.validation.passed);

    assert!(approvals.audit_log().is_empty());
    assert_eq!(submitter.calls.load(Ordering::SeqCst), 1);
    let request = submitter.requests.lock().unwrap()[0].clone();
    assert_eq!(request.title, "Auto-fix: null pointer");
    assert_eq!(request.base_branch, "main");
    assert!(request.body.contains(&report.run_id.to_string()));

    assert_eq!(store.read().await.len(), 1);
    let reopened = EpisodicStore::open(dir.path().join("episodic_store.json")).unwrap();
    assert_eq!(reopened.all()[0].run_id, report.run_id);
}

#[tokio::test]
async fn test_high_risk_plan_is_rejected_and_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let submitter = Arc::new(RecordingSubmitter::default());
    let approvals = ApprovalGate::new();
    let model = ScriptedModel::new(
        r#"{"steps": [{"step_id": "s1", "type": "code_change", "description": "rewrite", "refactored_code": "pass"}], "estimated_risk_score": 90}"#,
    );

    let pipeline = pipeline(store.clone(), Some(model), submitter.clone()).with_approval_gate(approvals.clone());
    let report = pipeline.run_once().await;

    assert_eq!(report.status(), "rejected_by_approval");
    match report.outcome {
        RunOutcome::RejectedByApproval { reason, .. } => assert_eq!(reason, "requires_manual_review"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let audit = approvals.audit_log();
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].outcome.granted);
    assert_eq!(audit[0].risk_score, 90);
    assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    assert!(store.read().await.is_empty());
}

#[tokio::test]
async fn test_later_runs_learn_from_earlier_fixes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let submitter = Arc::new(RecordingSubmitter::default());
    let model = ScriptedModel::new(
        r#"{"steps": [{"step_id": "s1", "type": "code_change", "description": "guard None", "refactored_code": "def serialize(data):\n    return None if data is None else data.value"}], "estimated_risk_score": 25}"#,
    );

    let pipeline = pipeline(store.clone(), Some(model.clone()), submitter);
    let first = pipeline.run_once().await;
    let second = pipeline.run_once().await;

    assert!(!first.record().unwrap().plan.memory_context_used);
    assert!(second.record().unwrap().plan.memory_context_used);

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("PAST SUCCESSFUL FIXES"));
    assert!(prompts[1].contains("PAST SUCCESSFUL FIXES"));
    assert!(prompts[1].contains("return None if data is None"));
    assert!(prompts[1].contains("(Success rate: 100%)"));

    let store = store.read().await;
    assert_eq!(store.len(), 2);
    assert_eq!(store.statistics("NULL POINTER").success_count, 2);
}

#[tokio::test]
async fn test_missing_token_yields_demo_pull_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let submitter = Arc::new(GitHubSubmitter::new("http://127.0.0.1:9", None).unwrap());

    let report = pipeline(store, None, submitter).run_once().await;

    let change = &report.insights().unwrap().change;
    assert_eq!(change.identifier, Some(1));
    assert_eq!(
        change.url.as_deref(),
        Some("https://example.com/shreyas7ss/testrepo/pull/1")
    );
}

//! Pull request submission against the GitHub REST API
//!
//! A submission creates (or reuses) the head branch from the base branch,
//! commits every file of the plan to it and opens a pull request.
//! Without a token the submitter reports a demo pull request instead of
//! touching the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RepositoryConfig;
use crate::types::{ChangeResult, ChangeSet};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const FALLBACK_DEFAULT_BRANCH: &str = "master";

/// Everything needed to open one pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    /// `owner/name`
    pub repo: String,
    pub base_branch: String,
    pub head_branch: String,
    pub title: String,
    pub body: String,
    pub change_sets: Vec<ChangeSet>,
}

impl ChangeRequest {
    pub fn file_count(&self) -> usize {
        self.change_sets.iter().map(ChangeSet::len).sum()
    }
}

/// Submits a change request to a code host
///
/// Host-level refusals come back as an error-status [`ChangeResult`];
/// `Err` is reserved for transport failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeSubmitter: Send + Sync {
    async fn submit(&self, request: &ChangeRequest) -> Result<ChangeResult>;
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RepoMeta {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentMeta {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRef<'a> {
    #[serde(rename = "ref")]
    reference: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct PutContent<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

/// Demo result reported when no token is configured
pub fn demo_result(repo: &str, head_branch: &str) -> ChangeResult {
    ChangeResult::ok(1, format!("https://example.com/{}/pull/1", repo), head_branch)
}

/// `owner/name` with both parts present
fn valid_repo(repo: &str) -> bool {
    matches!(repo.split_once('/'), Some((owner, name)) if !owner.is_empty() && !name.is_empty())
}

/// GitHub-backed [`ChangeSubmitter`]
pub struct GitHubSubmitter {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubSubmitter {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("autofix-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Submitter for the configured API base, using the stored repository token
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        let token = crate::security::get_credential(crate::security::Credential::RepoToken);
        Self::new(&config.api_base, token)
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn authed(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("Authorization", format!("token {}", token))
            .header("Accept", GITHUB_ACCEPT)
    }

    /// Head commit of `branch`, or `None` when the ref does not exist
    async fn branch_sha(&self, token: &str, repo: &str, branch: &str) -> Result<Option<String>> {
        let url = format!("{}/repos/{}/git/ref/heads/{}", self.api_base, repo, branch);
        let response = self
            .authed(self.client.get(&url), token)
            .send()
            .await
            .context("Failed to fetch branch ref from GitHub")?;
        if response.status() != StatusCode::OK {
            return Ok(None);
        }
        let git_ref: GitRef = response.json().await.context("Failed to parse GitHub ref")?;
        Ok(Some(git_ref.object.sha))
    }

    async fn default_branch(&self, token: &str, repo: &str) -> Result<String> {
        let url = format!("{}/repos/{}", self.api_base, repo);
        let response = self
            .authed(self.client.get(&url), token)
            .send()
            .await
            .context("Failed to fetch repository metadata from GitHub")?;
        let meta: Option<RepoMeta> = response.json().await.ok();
        Ok(meta
            .and_then(|m| m.default_branch)
            .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string()))
    }

    /// Creates the branch; an existing branch (422) is accepted
    async fn create_branch(&self, token: &str, repo: &str, branch: &str, sha: &str) -> Result<bool> {
        let url = format!("{}/repos/{}/git/refs", self.api_base, repo);
        let response = self
            .authed(self.client.post(&url), token)
            .json(&CreateRef {
                reference: format!("refs/heads/{}", branch),
                sha,
            })
            .send()
            .await
            .context("Failed to create branch on GitHub")?;
        let status = response.status();
        if status == StatusCode::CREATED || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Failed to create branch {}: {} {}", branch, status, crate::truncate_safe(&body, 300));
        Ok(false)
    }

    async fn commit_file(&self, token: &str, repo: &str, branch: &str, path: &str, content: &str) -> Result<bool> {
        let url = format!("{}/repos/{}/contents/{}", self.api_base, repo, path);
        let existing = self
            .authed(self.client.get(&url), token)
            .query(&[("ref", branch)])
            .send()
            .await
            .context("Failed to look up file on GitHub")?;
        let sha = if existing.status() == StatusCode::OK {
            existing.json::<ContentMeta>().await.ok().map(|m| m.sha)
        } else {
            None
        };

        let response = self
            .authed(self.client.put(&url), token)
            .json(&PutContent {
                message: format!("Update {}", path),
                content: base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
                branch,
                sha,
            })
            .send()
            .await
            .context("Failed to commit file to GitHub")?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!("Committed {} ({} bytes)", path, content.len());
            Ok(true)
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!("Failed to commit {}: {} {}", path, status, crate::truncate_safe(&body, 300));
            Ok(false)
        }
    }

    async fn open_pull(&self, token: &str, request: &ChangeRequest, base: &str) -> Result<Option<PullRequest>> {
        let url = format!("{}/repos/{}/pulls", self.api_base, request.repo);
        let response = self
            .authed(self.client.post(&url), token)
            .json(&CreatePull {
                title: &request.title,
                body: &request.body,
                head: &request.head_branch,
                base,
            })
            .send()
            .await
            .context("Failed to create pull request on GitHub")?;
        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            error!("PR creation failed: {} {}", status, crate::truncate_safe(&body, 300));
            return Ok(None);
        }
        let pull = response.json().await.context("Failed to parse pull request response")?;
        Ok(Some(pull))
    }
}

#[async_trait]
impl ChangeSubmitter for GitHubSubmitter {
    async fn submit(&self, request: &ChangeRequest) -> Result<ChangeResult> {
        let Some(token) = self.token.as_deref() else {
            warn!("No repository token set; reporting demo PR");
            return Ok(demo_result(&request.repo, &request.head_branch));
        };
        if !valid_repo(&request.repo) {
            return Ok(ChangeResult::error("invalid_repo"));
        }
        let repo = request.repo.as_str();

        let mut base = request.base_branch.clone();
        let mut base_sha = self.branch_sha(token, repo, &base).await?;
        if base_sha.is_none() {
            base = self.default_branch(token, repo).await?;
            warn!("Base branch {} not found, trying {}", request.base_branch, base);
            base_sha = self.branch_sha(token, repo, &base).await?;
        }
        let Some(base_sha) = base_sha else {
            return Ok(ChangeResult::error("base_branch_not_found"));
        };
        info!("Using base branch: {}, SHA: {}", base, base_sha);

        if !self.create_branch(token, repo, &request.head_branch, &base_sha).await? {
            return Ok(ChangeResult::error("branch_creation_failed"));
        }

        info!("Files to commit: {}", request.file_count());
        for change in request.change_sets.iter().flat_map(|set| set.files()) {
            self.commit_file(token, repo, &request.head_branch, &change.path, &change.patch)
                .await?;
        }

        match self.open_pull(token, request, &base).await? {
            Some(pull) => Ok(ChangeResult::ok(pull.number, pull.html_url, &request.head_branch)),
            None => Ok(ChangeResult::error("pr_creation_failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeStatus, FileChange};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(repo: &str) -> ChangeRequest {
        ChangeRequest {
            repo: repo.into(),
            base_branch: "main".into(),
            head_branch: "Agent".into(),
            title: "Auto-fix: x".into(),
            body: "body".into(),
            change_sets: vec![ChangeSet(vec![
                FileChange { path: "a.py".into(), patch: "1".into() },
                FileChange { path: "b.py".into(), patch: "2".into() },
            ])],
        }
    }

    #[tokio::test]
    async fn test_demo_result_without_token() {
        let submitter = GitHubSubmitter::new("http://127.0.0.1:9", None).unwrap();
        let result = submitter.submit(&request("acme/widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Ok);
        assert_eq!(result.identifier, Some(1));
        assert_eq!(result.url.as_deref(), Some("https://example.com/acme/widgets/pull/1"));
        assert_eq!(result.head_branch.as_deref(), Some("Agent"));
    }

    #[tokio::test]
    async fn test_invalid_repo_is_rejected_before_network() {
        let submitter = GitHubSubmitter::new("http://127.0.0.1:9", Some("t".into())).unwrap();
        let result = submitter.submit(&request("widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Error);
        assert_eq!(result.reason.as_deref(), Some("invalid_repo"));
    }

    fn submitter(server: &MockServer) -> GitHubSubmitter {
        GitHubSubmitter::new(server.uri(), Some("secret".into())).unwrap()
    }

    async fn mount_ref(server: &MockServer, branch: &str, sha: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/git/ref/heads/{}", branch)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": {"sha": sha}})))
            .mount(server)
            .await;
    }

    async fn mount_puts(server: &MockServer) {
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(server)
            .await;
    }

    async fn mount_pull(server: &MockServer, base: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/pulls"))
            .and(body_partial_json(json!({"head": "Agent", "base": base, "title": "Auto-fix: x"})))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "number": 9,
                "html_url": "https://github.com/acme/widgets/pull/9"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_existing_branch_and_file_still_open_pull() {
        let server = MockServer::start().await;
        mount_ref(&server, "main", "base123").await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/git/refs"))
            .and(body_partial_json(json!({"ref": "refs/heads/Agent", "sha": "base123"})))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "Reference already exists"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/contents/a.py"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "old"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/acme/widgets/contents/a.py"))
            .and(body_partial_json(json!({"sha": "old", "branch": "Agent", "content": "MQ=="})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/acme/widgets/contents/b.py"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        mount_pull(&server, "main", 201).await;

        let result = submitter(&server).submit(&request("acme/widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Ok);
        assert_eq!(result.identifier, Some(9));
        assert_eq!(result.url.as_deref(), Some("https://github.com/acme/widgets/pull/9"));
        assert_eq!(result.head_branch.as_deref(), Some("Agent"));

        let requests = server.received_requests().await.unwrap();
        let new_file = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT" && r.url.path().ends_with("/b.py"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&new_file.body).unwrap();
        assert!(body.get("sha").is_none());
        assert_eq!(requests[0].headers.get("authorization").unwrap().to_str().unwrap(), "token secret");
    }

    #[tokio::test]
    async fn test_missing_base_falls_back_to_default_branch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"default_branch": "trunk"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_ref(&server, "trunk", "trunk456").await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/git/refs"))
            .and(body_partial_json(json!({"sha": "trunk456"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        mount_puts(&server).await;
        mount_pull(&server, "trunk", 201).await;

        let result = submitter(&server).submit(&request("acme/widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Ok);
        assert_eq!(result.identifier, Some(9));
    }

    #[tokio::test]
    async fn test_no_base_branch_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let result = submitter(&server).submit(&request("acme/widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Error);
        assert_eq!(result.reason.as_deref(), Some("base_branch_not_found"));
    }

    #[tokio::test]
    async fn test_branch_creation_failure_stops_submission() {
        let server = MockServer::start().await;
        mount_ref(&server, "main", "base123").await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/git/refs"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Resource not accessible"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let result = submitter(&server).submit(&request("acme/widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Error);
        assert_eq!(result.reason.as_deref(), Some("branch_creation_failed"));
    }

    #[tokio::test]
    async fn test_rejected_pull_request() {
        let server = MockServer::start().await;
        mount_ref(&server, "main", "base123").await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/git/refs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&server)
            .await;
        mount_puts(&server).await;
        mount_pull(&server, "main", 422).await;

        let result = submitter(&server).submit(&request("acme/widgets")).await.unwrap();
        assert_eq!(result.status, ChangeStatus::Error);
        assert_eq!(result.reason.as_deref(), Some("pr_creation_failed"));
        assert!(result.identifier.is_none());
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let submitter = GitHubSubmitter::new("https://api.github.com/", Some("  ".into())).unwrap();
        assert!(!submitter.has_token());
        assert_eq!(submitter.api_base, "https://api.github.com");
    }

    #[test]
    fn test_valid_repo() {
        assert!(valid_repo("a/b"));
        assert!(!valid_repo("/b"));
        assert!(!valid_repo("a/"));
        assert!(!valid_repo("ab"));
        assert_eq!(request("a/b").file_count(), 2);
    }
}

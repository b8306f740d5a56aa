//! LLM client for OpenAI-compatible chat completion APIs (Groq, OpenRouter)
//!
//! The run loop only sees the [`CompletionProvider`] seam: prompt in, text out.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, LlmProvider};

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

// ============ Provider Configuration ============

/// Configuration for an LLM API provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the API (e.g., "https://api.groq.com/openai/v1")
    pub base_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Extra headers to include in requests (e.g., X-Title, HTTP-Referer)
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Create a Groq provider configuration
    pub fn groq(api_key: String) -> Self {
        Self {
            base_url: GROQ_BASE_URL.to_string(),
            api_key,
            extra_headers: Vec::new(),
        }
    }

    /// Create an OpenRouter provider configuration
    pub fn openrouter(api_key: String) -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key,
            extra_headers: vec![
                ("HTTP-Referer".to_string(), "https://github.com/autofix-agent".to_string()),
                ("X-Title".to_string(), "Autofix Agent".to_string()),
            ],
        }
    }

    /// Any other OpenAI-compatible endpoint
    pub fn custom(api_key: String, base_url: String) -> Self {
        Self {
            base_url,
            api_key,
            extra_headers: Vec::new(),
        }
    }

    /// Build from the `[llm]` config section
    pub fn from_config(config: &LlmConfig, api_key: String) -> Self {
        let mut provider = match config.provider {
            LlmProvider::Groq => Self::groq(api_key),
            LlmProvider::OpenRouter => Self::openrouter(api_key),
            LlmProvider::Custom => Self::custom(api_key, config.base_url.clone().unwrap_or_default()),
        };
        if let Some(url) = &config.base_url {
            provider.base_url = url.trim_end_matches('/').to_string();
        }
        provider
    }
}

// ============ Wire types ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// ============ Completion seam ============

/// Black-box text completion used by the detector and planner
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// LLM API client bound to one provider, model and temperature
#[derive(Clone)]
pub struct LlmClient {
    client: Arc<Client>,
    provider: ProviderConfig,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(provider: ProviderConfig, model: impl Into<String>, temperature: f32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("autofix-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client: Arc::new(client),
            provider,
            model: model.into(),
            temperature,
        })
    }

    /// Client from config and the stored API key; `None` when no key is configured
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        let Some(api_key) = crate::security::get_credential(crate::security::Credential::LlmApiKey) else {
            return Ok(None);
        };
        let provider = ProviderConfig::from_config(config, api_key);
        Self::new(provider, config.model.clone(), config.temperature).map(Some)
    }

    /// Get the provider configuration
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a chat completion request
    pub async fn chat(&self, messages: Vec<ChatMessage>, max_tokens: Option<u32>) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens,
            temperature: Some(self.temperature),
        };

        let mut req_builder = self
            .client
            .post(format!("{}/chat/completions", self.provider.base_url))
            .header("Authorization", format!("Bearer {}", self.provider.api_key));
        for (key, value) in &self.provider.extra_headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }
        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to send request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, crate::truncate_safe(&body, 500));
        }

        let body = response.text().await.context("Failed to read response body")?;
        extract_message_content(&body)
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.chat(vec![ChatMessage::user(prompt)], Some(max_tokens)).await
    }
}

/// Pull the first choice's message text out of a chat completion body.
/// Handles both string content and array-of-content-parts formats.
fn extract_message_content(body: &str) -> Result<String> {
    let raw: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        anyhow::anyhow!(
            "Failed to parse JSON response: {} (body: {})",
            e,
            crate::truncate_safe(body, 500)
        )
    })?;

    let content = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Array(parts)) => Ok(parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("")),
        _ => bail!("LLM response has no message content"),
    }
}

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid fenced block regex")
});

/// Strip a markdown code fence around a JSON payload, if present
pub fn extract_json(text: &str) -> &str {
    match FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_string_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(extract_message_content(body).unwrap(), "hello");
    }

    #[test]
    fn test_extract_parts_content() {
        let body = r#"{"choices":[{"message":{"content":[{"type":"text","text":"a"},{"type":"image_url"},{"type":"text","text":"b"}]}}]}"#;
        assert_eq!(extract_message_content(body).unwrap(), "ab");
    }

    #[test]
    fn test_missing_content_is_error() {
        assert!(extract_message_content(r#"{"choices":[]}"#).is_err());
        assert!(extract_message_content("not json").is_err());
    }

    #[test]
    fn test_extract_json_strips_fence() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("Here:\n```\n[1]\n```\nthanks"), "[1]");
        assert_eq!(extract_json("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_provider_from_config() {
        let mut config = LlmConfig::default();
        let groq = ProviderConfig::from_config(&config, "k".into());
        assert_eq!(groq.base_url, GROQ_BASE_URL);

        config.provider = LlmProvider::OpenRouter;
        config.base_url = Some("http://localhost:9000/v1/".into());
        let custom = ProviderConfig::from_config(&config, "k".into());
        assert_eq!(custom.base_url, "http://localhost:9000/v1");
        assert_eq!(custom.extra_headers.len(), 2);
    }
}

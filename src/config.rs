//! Configuration management
//!
//! Manages agent configuration: language model provider, target repository,
//! risk policy, scheduling and episodic store location.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AgentError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Language model settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Repository that receives pull requests
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Risk policy
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Loop scheduling
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Episodic store location
    #[serde(default)]
    pub memory: MemoryConfig,
    /// What the sensor inspects
    #[serde(default)]
    pub sensor: SensorConfig,
}

/// Supported OpenAI-compatible providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    OpenRouter,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    /// Overrides the provider's base URL (required for `custom`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_plan_max_tokens")]
    pub plan_max_tokens: u32,
    #[serde(default = "default_detect_max_tokens")]
    pub detect_max_tokens: u32,
}

fn default_provider() -> LlmProvider {
    LlmProvider::Groq
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_plan_max_tokens() -> u32 {
    2000
}

fn default_detect_max_tokens() -> u32 {
    500
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            plan_max_tokens: default_plan_max_tokens(),
            detect_max_tokens: default_detect_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// `owner/name`
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Single branch reused for every agent commit
    #[serde(default = "default_head_branch")]
    pub head_branch: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_repo() -> String {
    "shreyas7ss/testrepo".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_head_branch() -> String {
    "Agent".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            base_branch: default_base_branch(),
            head_branch: default_head_branch(),
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Plans with a risk score above this need manual review
    #[serde(default = "default_hitl_threshold")]
    pub hitl_threshold: i32,
}

fn default_hitl_threshold() -> i32 {
    crate::security::DEFAULT_HITL_THRESHOLD
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hitl_threshold: default_hitl_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u64>,
}

fn default_interval_minutes() -> u64 {
    5
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            max_runs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Defaults to `<data_dir>/episodic_store.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    /// Relative to `repo_root`
    #[serde(default = "default_target_file")]
    pub target_file: PathBuf,
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_target_file() -> PathBuf {
    PathBuf::from("sample_repo/services/order/serializer.py")
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            target_file: default_target_file(),
        }
    }
}

impl Config {
    /// Load configuration from the default file, creating it on first use,
    /// then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without touching the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Apply `GITHUB_REPO`, `GITHUB_BASE_BRANCH`, `AGENT_BRANCH`,
    /// `AGENT_HITL_THRESHOLD` and `AGENT_STORE_PATH`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(repo) = get("GITHUB_REPO") {
            self.repository.repo = repo;
        }
        if let Some(base) = get("GITHUB_BASE_BRANCH") {
            self.repository.base_branch = base;
        }
        if let Some(head) = get("AGENT_BRANCH") {
            self.repository.head_branch = head;
        }
        if let Some(threshold) = get("AGENT_HITL_THRESHOLD") {
            match threshold.trim().parse() {
                Ok(value) => self.policy.hitl_threshold = value,
                Err(_) => tracing::warn!("Ignoring non-numeric AGENT_HITL_THRESHOLD '{}'", threshold),
            }
        }
        if let Some(path) = get("AGENT_STORE_PATH") {
            self.memory.store_path = Some(PathBuf::from(path));
        }
    }

    /// Reject settings the run loop cannot work with
    pub fn validate(&self) -> std::result::Result<(), AgentError> {
        if self.scheduler.interval_minutes == 0 {
            return Err(AgentError::InvalidConfig(
                "scheduler.interval_minutes must be greater than 0".into(),
            ));
        }
        if self.scheduler.max_runs == Some(0) {
            return Err(AgentError::InvalidConfig(
                "scheduler.max_runs must be a positive integer".into(),
            ));
        }
        if self.llm.provider == LlmProvider::Custom && self.llm.base_url.is_none() {
            return Err(AgentError::InvalidConfig(
                "llm.base_url is required for the custom provider".into(),
            ));
        }
        Ok(())
    }

    /// Where the episodic store lives
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.memory.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(crate::learning::store::STORE_FILE)),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "autofix-agent", "autofix-agent")
        .context("Failed to get project directories")
}

/// Get the configuration directory path
pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    let llm_key = crate::security::get_credential(crate::security::Credential::LlmApiKey).is_some();
    let repo_token = crate::security::get_credential(crate::security::Credential::RepoToken).is_some();

    println!("Config file: {}", config_path()?.display());
    println!();
    println!("LLM:");
    println!("  provider:     {:?}", config.llm.provider);
    println!("  model:        {}", config.llm.model);
    println!("  api key:      {}", if llm_key { "configured" } else { "missing (fallback planner + synthetic detector)" });
    println!("Repository:");
    println!("  repo:         {}", config.repository.repo);
    println!("  base branch:  {}", config.repository.base_branch);
    println!("  head branch:  {}", config.repository.head_branch);
    println!("  token:        {}", if repo_token { "configured" } else { "missing (demo pull requests)" });
    println!("Policy:");
    println!("  HITL threshold: {}", config.policy.hitl_threshold);
    println!("Scheduler:");
    println!("  interval:     {} minute(s)", config.scheduler.interval_minutes);
    println!(
        "  max runs:     {}",
        config.scheduler.max_runs.map(|n| n.to_string()).unwrap_or_else(|| "unlimited".into())
    );
    println!("Memory:");
    println!("  store:        {}", config.store_path()?.display());
    println!("Sensor:");
    println!(
        "  target:       {}",
        config.sensor.repo_root.join(&config.sensor.target_file).display()
    );

    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

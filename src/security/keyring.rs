//! Keyring integration for secure credential storage
//! Environment variables win, then the OS keyring, then a 0600 file fallback

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const SERVICE_NAME: &str = "autofix-agent";

/// A credential the agent can look up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    /// API key for the plan/detection language model
    LlmApiKey,
    /// Token for the repository host API
    RepoToken,
}

impl Credential {
    fn username(&self) -> &'static str {
        match self {
            Credential::LlmApiKey => "llm-api-key",
            Credential::RepoToken => "github-token",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            Credential::LlmApiKey => "llm_api_key.txt",
            Credential::RepoToken => "github_token.txt",
        }
    }

    /// Environment variables checked first, in order
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Credential::LlmApiKey => &["GROQ_API_KEY", "LLM_API_KEY", "OPENROUTER_API_KEY"],
            Credential::RepoToken => &["GITHUB_TOKEN", "GIT_TOKEN"],
        }
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::LlmApiKey => write!(f, "LLM API key"),
            Credential::RepoToken => write!(f, "repository token"),
        }
    }
}

fn credential_file_path(credential: Credential) -> Result<PathBuf> {
    let dir = crate::config::config_dir()?;
    fs::create_dir_all(&dir).context("Failed to create config directory")?;
    Ok(dir.join(credential.file_name()))
}

/// Store a credential - tries keyring first, falls back to file
pub fn set_credential(credential: Credential, value: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, credential.username()) {
        if entry.set_password(value).is_ok() {
            return Ok(());
        }
    }

    let path = credential_file_path(credential)?;
    fs::write(&path, value).with_context(|| format!("Failed to write {} file", credential))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    Ok(())
}

/// Look up a credential, `None` when it is configured nowhere
pub fn get_credential(credential: Credential) -> Option<String> {
    for var in credential.env_vars() {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, credential.username()) {
        if let Ok(value) = entry.get_password() {
            return Some(value);
        }
    }

    let path = credential_file_path(credential).ok()?;
    fs::read_to_string(path)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Remove a credential from both keyring and file
pub fn delete_credential(credential: Credential) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, credential.username()) {
        let _ = entry.delete_credential();
    }

    let path = credential_file_path(credential)?;
    if path.exists() {
        fs::remove_file(&path).with_context(|| format!("Failed to delete {} file", credential))?;
    }
    Ok(())
}

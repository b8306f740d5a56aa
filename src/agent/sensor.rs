//! Repository sensing
//!
//! Captures the observable state a run starts from: the checked-out commit,
//! one monitored file and the CI status.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::SensorConfig;
use crate::types::{FileSnapshot, SensedState};

const UNKNOWN: &str = "unknown";

/// Produces the state a run starts from
#[async_trait]
pub trait Sensor: Send + Sync {
    async fn sense(&self) -> Result<SensedState>;
}

/// Reads the target file and HEAD of a local checkout
#[derive(Debug, Clone)]
pub struct RepoSensor {
    repo_root: PathBuf,
    target_file: PathBuf,
}

impl RepoSensor {
    pub fn new(repo_root: impl Into<PathBuf>, target_file: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            target_file: target_file.into(),
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(&config.repo_root, &config.target_file)
    }

    /// Commit checked out at `repo_root`, following a symbolic ref once
    async fn git_head(&self) -> String {
        let git_dir = self.repo_root.join(".git");
        let head = match tokio::fs::read_to_string(git_dir.join("HEAD")).await {
            Ok(head) => head,
            Err(e) => {
                debug!("No readable HEAD under {}: {}", git_dir.display(), e);
                return UNKNOWN.to_string();
            }
        };
        let head = head.trim();
        match head.strip_prefix("ref:") {
            Some(reference) => resolve_ref(&git_dir, reference.trim()).await,
            None if !head.is_empty() => head.to_string(),
            None => UNKNOWN.to_string(),
        }
    }

    async fn snapshot(&self) -> FileSnapshot {
        let path = self.target_file.to_string_lossy().into_owned();
        match tokio::fs::read_to_string(self.repo_root.join(&self.target_file)).await {
            Ok(content) => FileSnapshot {
                path,
                content: Some(content),
                error: None,
            },
            Err(e) => {
                warn!("Could not read {}: {}", path, e);
                FileSnapshot {
                    path,
                    content: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

async fn resolve_ref(git_dir: &Path, reference: &str) -> String {
    if let Ok(sha) = tokio::fs::read_to_string(git_dir.join(reference)).await {
        let sha = sha.trim();
        if !sha.is_empty() {
            return sha.to_string();
        }
    }
    // Packed refs: "<sha> <ref>" per line
    if let Ok(packed) = tokio::fs::read_to_string(git_dir.join("packed-refs")).await {
        for line in packed.lines() {
            if let Some((sha, name)) = line.split_once(' ') {
                if name.trim() == reference {
                    return sha.to_string();
                }
            }
        }
    }
    reference.to_string()
}

#[async_trait]
impl Sensor for RepoSensor {
    async fn sense(&self) -> Result<SensedState> {
        let git_head = self.git_head().await;
        let files_snapshot = self.snapshot().await;
        Ok(SensedState {
            git_head,
            files_snapshot,
            ci_status: UNKNOWN.to_string(),
        })
    }
}

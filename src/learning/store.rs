//! Episodic Store - append-only log of past runs
//!
//! Backed by a single JSON array under ~/.local/share/autofix-agent/ that is
//! rewritten in full after every append. Records are never mutated or removed.
//! Retrieval is substring-based on the detection description and feeds the
//! planner's few-shot examples and success statistics.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::types::RunRecord;

/// Max chars of code kept in a statistics fix excerpt
pub const FIX_EXCERPT_CHARS: usize = 500;

pub const STORE_FILE: &str = "episodic_store.json";

/// Store handle shared by the planner (reads) and the pipeline (appends)
pub type SharedEpisodicStore = Arc<RwLock<EpisodicStore>>;

/// Latest successful fix for an issue family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixExcerpt {
    pub file_path: String,
    pub code_snippet: String,
}

/// Success statistics for an issue family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueStatistics {
    pub total: usize,
    pub success_count: usize,
    pub success_rate: f64,
    pub most_recent_fix: Option<FixExcerpt>,
}

/// Persistent, append-only history of runs
#[derive(Debug)]
pub struct EpisodicStore {
    path: PathBuf,
    runs: Vec<RunRecord>,
}

impl EpisodicStore {
    /// Open (or start) a store backed by `path`.
    ///
    /// Missing, unreadable or corrupt content yields an empty log. A corrupt
    /// file is moved aside to `<name>.corrupt` so the first append cannot
    /// overwrite the old history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }

        let runs = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) if content.trim().is_empty() => Vec::new(),
                Ok(content) => match serde_json::from_str::<Vec<RunRecord>>(&content) {
                    Ok(runs) => runs,
                    Err(e) => {
                        warn!("Episodic store {} is corrupt, starting empty: {}", path.display(), e);
                        quarantine(&path);
                        Vec::new()
                    }
                },
                Err(e) => {
                    warn!("Episodic store {} is unreadable, starting empty: {}", path.display(), e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        info!("Opened episodic store {} ({} runs)", path.display(), runs.len());
        Ok(Self { path, runs })
    }

    /// Wrap into the shared handle used by the planner and pipeline
    pub fn into_shared(self) -> SharedEpisodicStore {
        Arc::new(RwLock::new(self))
    }

    /// Append a record and rewrite the backing snapshot.
    ///
    /// On a persistence failure the in-memory log still holds the record.
    pub fn append(&mut self, record: RunRecord) -> AgentResult<()> {
        debug!("Appending run {} to episodic store", record.run_id);
        self.runs.push(record);
        self.persist()
    }

    /// Rewrite the full snapshot. Exposed so a caller can retry after a failed append.
    pub fn persist(&self) -> AgentResult<()> {
        let json = serde_json::to_string_pretty(&self.runs).map_err(|e| AgentError::Persistence {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|source| AgentError::Persistence {
                path: self.path.clone(),
                source,
            })
    }

    /// Every record, oldest first
    pub fn all(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Records whose issue description contains `substring` (case-insensitive), oldest first
    pub fn find_by_issue(&self, substring: &str) -> Vec<&RunRecord> {
        let needle = substring.to_lowercase();
        self.runs
            .iter()
            .filter(|run| run.detection.description.to_lowercase().contains(&needle))
            .collect()
    }

    /// Matching records whose submission succeeded, oldest first
    pub fn find_successful(&self, substring: &str) -> Vec<&RunRecord> {
        self.find_by_issue(substring)
            .into_iter()
            .filter(|run| run.succeeded())
            .collect()
    }

    /// Up to `limit` successful matches, newest first
    pub fn recent_successful_examples(&self, substring: &str, limit: usize) -> Vec<&RunRecord> {
        self.find_successful(substring)
            .into_iter()
            .rev()
            .take(limit)
            .collect()
    }

    /// Most recent successful match
    pub fn latest_successful_fix(&self, substring: &str) -> Option<&RunRecord> {
        self.find_successful(substring).pop()
    }

    /// Success statistics for an issue family
    pub fn statistics(&self, substring: &str) -> IssueStatistics {
        let total = self.find_by_issue(substring).len();
        let success_count = self.find_successful(substring).len();
        let success_rate = if total == 0 {
            0.0
        } else {
            success_count as f64 / total as f64
        };

        let most_recent_fix = self
            .latest_successful_fix(substring)
            .and_then(|run| run.plan.first_change())
            .map(|change| FixExcerpt {
                file_path: change.path.clone(),
                code_snippet: crate::truncate_safe(&change.patch, FIX_EXCERPT_CHARS).to_string(),
            });

        IssueStatistics {
            total,
            success_count,
            success_rate,
            most_recent_fix,
        }
    }

    /// Point lookup by run id
    pub fn get_by_id(&self, run_id: &Uuid) -> Option<&RunRecord> {
        self.runs.iter().find(|run| &run.run_id == run_id)
    }

    /// The `limit` most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<&RunRecord> {
        self.runs.iter().rev().take(limit).collect()
    }
}

/// Move a corrupt snapshot to `<name>.corrupt`, replacing any earlier one
fn quarantine(path: &Path) {
    let mut target = path.as_os_str().to_owned();
    target.push(".corrupt");
    let target = PathBuf::from(target);
    match std::fs::rename(path, &target) {
        Ok(()) => warn!("Moved corrupt episodic store to {}", target.display()),
        Err(e) => warn!("Failed to move corrupt episodic store aside: {}", e),
    }
}

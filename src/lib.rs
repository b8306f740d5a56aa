//! Autofix Agent - autonomous code remediation loop
//!
//! Each run senses a repository, detects one issue, turns it into a policy
//! decision, plans a fix (reusing past successful fixes from the episodic
//! store), gates risky plans behind manual review, opens a pull request and
//! records the outcome so later plans can learn from it.
//!
//! # Example
//!
//! ```ignore
//! use autofix_agent::cli::build_pipeline;
//! use autofix_agent::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pipeline = build_pipeline(&config)?;
//!     let report = pipeline.run_once().await;
//!     println!("{}: {}", report.run_id, report.status());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod types;
pub mod error;
pub mod config;
pub mod learning;
pub mod security;
pub mod agent;
pub mod tools;
pub mod orchestrator;
pub mod cli;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use learning::{EpisodicStore, SharedEpisodicStore};
pub use orchestrator::{BoundedScheduler, RunOutcome, RunPipeline, RunReport, SchedulerConfig};
pub use security::{ApprovalGate, PolicyGate};
pub use types::{Decision, Detection, Plan, RunRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Autonomous code remediation agent", NAME, VERSION)
}

/// Prefix of `s` holding at most `max_chars` characters, cut on a char boundary
pub fn truncate_safe(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

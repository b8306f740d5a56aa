//! Error taxonomy for the run loop
//!
//! Collaborator and policy errors are recovered at the stage that raised them;
//! persistence errors are logged and reported alongside the run result. An
//! approval denial is a normal outcome, not an error.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the agent core
#[derive(Debug, Error)]
pub enum AgentError {
    /// A detection, generation or submission call failed or returned malformed data
    #[error("{collaborator} call failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// The risk threshold could not be evaluated
    #[error("risk policy evaluation failed: {0}")]
    Policy(String),

    /// The episodic store snapshot could not be written
    #[error("failed to persist episodic store at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    pub fn collaborator(collaborator: &'static str, err: impl std::fmt::Display) -> Self {
        AgentError::Collaborator {
            collaborator,
            message: err.to_string(),
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

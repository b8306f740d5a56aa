//! Tools module
//!
//! External side effects of a run. Currently only pull request submission.

pub mod github;

pub use github::{ChangeRequest, ChangeSubmitter, GitHubSubmitter};

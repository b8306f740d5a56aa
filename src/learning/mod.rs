//! Episodic learning
//!
//! Keeps the history of past runs so later plans can reuse fixes that were
//! accepted before, and reports per-issue success statistics.

pub mod store;

pub use store::{EpisodicStore, FixExcerpt, IssueStatistics, SharedEpisodicStore};

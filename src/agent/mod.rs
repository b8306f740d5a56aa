//! Agent module - sensing, detection and planning
//!
//! Everything that talks to the language model or inspects the repository
//! before the policy and approval gates get a say.

pub mod llm;
pub mod planner;
pub mod reasoner;
pub mod sensor;

pub use llm::{CompletionProvider, LlmClient, ProviderConfig};
pub use planner::Planner;
pub use reasoner::{Detector, LlmDetector, SyntheticDetector};
pub use sensor::{RepoSensor, Sensor};

//! Orchestration - the run pipeline and the scheduler that repeats it

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{RunOutcome, RunPipeline, RunReport};
pub use scheduler::{BoundedScheduler, ScheduledJob, SchedulerConfig};

//! Render jobs: the per-job browser pipeline, the in-memory job store, and
//! the scheduler that admits jobs under a concurrency cap.

pub mod error;
pub mod render;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use error::RenderError;
pub use render::{RenderConfig, RenderPipeline};
pub use runner::JobRunner;
pub use scheduler::Scheduler;
pub use store::{JobCounts, JobSnapshot, JobStore};

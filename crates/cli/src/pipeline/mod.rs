//! Pipeline orchestration on a simulated display.

mod display;
mod orchestrator;
mod producer;
mod stats;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::PipelineStats;

//! Run orchestration: cache lookup, deduplicated dispatch, aggregation

pub mod config;
pub mod context;
pub mod orchestrator;
pub mod result;
pub mod single_flight;
pub mod stage;

pub use config::PipelineConfig;
pub use context::OrchestratorContext;
pub use orchestrator::PipelineOrchestrator;
pub use result::{ModelResponse, PipelineResult, ResponseSource, RunMetadata, StageResponses};
pub use single_flight::SingleFlight;
pub use stage::{StageState, StageTracker};

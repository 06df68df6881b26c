//! vantage - multi-facet project assessment with LLMs
//!
//! Given structured facts about a project, vantage asks three independent
//! model stages for an architecture, a deployment and a business assessment,
//! then an aggregator stage for an executive verdict over the three.
//!
//! # Core Concepts
//!
//! - **Stages**: three independent facet roles plus one aggregator, each with
//!   its own model and a typed payload
//! - **Cache**: validated facet payloads persist across runs and are reused
//!   while the project's source fingerprint is unchanged
//! - **Rate limiting**: one token bucket shared by every call in the process
//! - **Fallbacks**: a stage that cannot produce a valid answer gets a
//!   deterministic degraded payload; a run always returns a full result
//!
//! # Example Usage
//!
//! ```no_run
//! use vantage::{OrchestratorContext, PipelineOrchestrator, ProjectFacts, VantageConfig};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = VantageConfig::default();
//! let context = OrchestratorContext::from_config(&config)?;
//! let pipeline = PipelineOrchestrator::from_config(&config, context)?;
//!
//! let facts = ProjectFacts::from_json_file(Path::new("facts.json"))?;
//! let result = pipeline.run(&facts).await;
//! println!("{}", result.to_json_pretty()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`pipeline`]: run orchestration, single-flight dispatch, results
//! - [`llm`]: transport seam, HTTP client, retries and the mock client
//! - [`cache`]: durable payload store
//! - [`validation`]: payload extraction and completeness scoring
//! - [`rate_limit`]: process-wide token bucket

pub mod assessment;
pub mod cache;
pub mod config;
pub mod facts;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod rate_limit;
pub mod util;
pub mod validation;

pub use assessment::{StagePayload, StageRole};
pub use cache::{CacheEntry, CacheError, CacheStore};
pub use config::{ConfigError, ModelRouting, VantageConfig};
pub use facts::{ProjectFacts, ProjectFingerprint, SourceFile};
pub use llm::{CallError, HttpChatClient, LLMClient, MockLLMClient};
pub use pipeline::{
    ModelResponse, OrchestratorContext, PipelineConfig, PipelineOrchestrator, PipelineResult,
    ResponseSource, RunMetadata,
};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler};
pub use prompt::{DefaultPrompts, PromptBuilder};
pub use rate_limit::RateLimiter;
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use validation::{ParseError, ResponseValidator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "vantage");
    }
}

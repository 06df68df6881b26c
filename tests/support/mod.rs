//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use vantage::llm::{MockLLMClient, MockResponse};
use vantage::{
    ModelRouting, OrchestratorContext, PipelineConfig, PipelineOrchestrator, ProgressEvent,
    ProgressHandler, ProjectFacts, SourceFile, StageRole,
};

pub const ARCHITECTURE: &str = r#"{
  "summary": "Modular monolith with a clean domain layer",
  "patterns": ["layered", "repository"],
  "strengths": ["clear module boundaries"],
  "weaknesses": ["shared database schema"],
  "complexity_score": 6,
  "recommendations": ["extract billing into its own module"]
}"#;

pub const DEPLOYMENT: &str = r#"Here is my assessment:
```json
{
  "summary": "Containerized service deployed through GitHub Actions",
  "readiness": "high",
  "platforms": ["kubernetes"],
  "risks": ["no rollback plan"],
  "readiness_score": 8,
  "recommendations": ["add canary releases"]
}
```"#;

pub const BUSINESS: &str = r#"{
  "summary": "B2B checkout SaaS",
  "target_users": "mid-size online retailers",
  "value_proposition": "faster checkout with fewer abandoned carts",
  "monetization": "tiered subscription",
  "risks": ["crowded market"],
  "viability_score": 7
}"#;

pub const AGGREGATE: &str = r#"```json
{
  "executive_summary": "Healthy product with a few operational gaps",
  "overall_score": 7.5,
  "key_risks": ["no rollback plan", "crowded market"],
  "priorities": ["add canary releases"],
  "facet_summaries": {"architecture": "sound", "deployment": "ready", "business": "viable"}
}
```"#;

pub fn model(role: StageRole) -> String {
    format!("{}-model", role)
}

/// One distinct model per role so scripted answers cannot cross stages
pub fn routing() -> ModelRouting {
    let mut routing = ModelRouting::default();
    for role in StageRole::ALL {
        routing.set(role, model(role));
    }
    routing
}

pub fn answer(role: StageRole) -> &'static str {
    match role {
        StageRole::Architecture => ARCHITECTURE,
        StageRole::Deployment => DEPLOYMENT,
        StageRole::Business => BUSINESS,
        StageRole::Aggregate => AGGREGATE,
    }
}

/// Every role answers successfully, indefinitely
pub fn happy_mock() -> Arc<MockLLMClient> {
    let mock = Arc::new(MockLLMClient::new());
    for role in StageRole::ALL {
        mock.set_default(&model(role), MockResponse::text(answer(role)));
    }
    mock
}

/// Every role answers successfully after `delay`
pub fn slow_mock(delay: Duration) -> Arc<MockLLMClient> {
    let mock = Arc::new(MockLLMClient::new());
    for role in StageRole::ALL {
        mock.set_default(
            &model(role),
            MockResponse::text(answer(role)).with_delay(delay),
        );
    }
    mock
}

pub fn facts(project: &str) -> ProjectFacts {
    let mut facts = ProjectFacts::new(project).with_source_files(vec![
        SourceFile::new("src/main.rs", "9f2c"),
        SourceFile::new("src/checkout.rs", "41aa"),
        SourceFile::new("Dockerfile", "c0de"),
    ]);
    facts.code.total_files = 3;
    facts.code.total_lines = 1840;
    facts.code.languages.insert("rust".to_string(), 1790);
    facts.deployment.artifacts.push("Dockerfile".to_string());
    facts.deployment.ci_providers.push("github-actions".to_string());
    facts.documentation.readme_present = true;
    facts
}

pub fn config() -> PipelineConfig {
    PipelineConfig::new("sk-test").with_models(routing())
}

pub fn pipeline(mock: Arc<MockLLMClient>, context: OrchestratorContext) -> PipelineOrchestrator {
    pipeline_with(config(), mock, context)
}

pub fn pipeline_with(
    config: PipelineConfig,
    mock: Arc<MockLLMClient>,
    context: OrchestratorContext,
) -> PipelineOrchestrator {
    PipelineOrchestrator::with_default_prompts(config, context, mock)
        .expect("valid pipeline configuration")
}

/// Captures progress events for ordering assertions
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressHandler for RecordingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn fixture_path(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

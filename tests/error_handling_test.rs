//! Error handling integration tests
//!
//! Failures of the inference service, the model output or the cache never
//! fail a run; they surface as degraded stages or progress events.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{facts, happy_mock, model, pipeline, pipeline_with, RecordingHandler};
use tempfile::TempDir;
use vantage::llm::MockResponse;
use vantage::{
    CacheStore, ConfigError, HttpChatClient, NoOpHandler, OrchestratorContext,
    PipelineOrchestrator, ProgressEvent, RateLimiter, ResponseSource, StagePayload, StageRole,
    VantageConfig,
};

#[tokio::test]
async fn test_unreachable_service_degrades_every_stage() {
    // Nothing listens on the discard port
    let client = HttpChatClient::new("http://127.0.0.1:9/v1", "sk-test", Duration::from_secs(5))
        .unwrap();
    let config = support::config()
        .with_max_attempts(1)
        .with_request_timeout(Duration::from_secs(5));
    let context = OrchestratorContext::in_memory(10).with_progress(Arc::new(NoOpHandler));
    let pipeline =
        PipelineOrchestrator::with_default_prompts(config, context, Arc::new(client)).unwrap();

    let result = pipeline.run(&facts("shop-api")).await;

    assert_eq!(result.metadata.degraded_roles, StageRole::ALL.to_vec());
    assert_eq!(result.metadata.api_calls, 4);
    assert!(result.metadata.models_used.is_empty());
    assert!(!result.metadata.deadline_exceeded);
    for response in result.responses.iter() {
        assert_eq!(response.source, ResponseSource::Fallback);
        assert!(response.error.is_some());
    }
    match &result.response(StageRole::Aggregate).payload {
        StagePayload::Aggregate(aggregate) => {
            assert!(aggregate.executive_summary.to_lowercase().contains("degraded"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert!(pipeline.context().cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_answer_is_not_retried() {
    let mock = happy_mock();
    mock.add_response(
        &model(StageRole::Architecture),
        MockResponse::text("```json\n{\"summary\": \"cut off mid\n```"),
    );
    let pipeline = pipeline(
        mock.clone(),
        OrchestratorContext::in_memory(10).with_progress(Arc::new(NoOpHandler)),
    );

    let result = pipeline.run(&facts("shop-api")).await;

    assert_eq!(mock.calls(&model(StageRole::Architecture)), 1);
    assert_eq!(result.metadata.degraded_roles, vec![StageRole::Architecture]);
    let architecture = result.response(StageRole::Architecture);
    assert!(architecture.raw_text.as_deref().unwrap().contains("cut off"));
    assert_eq!(
        architecture.payload,
        StagePayload::fallback(StageRole::Architecture)
    );
    // The aggregator still runs, told which input is degraded
    assert_eq!(
        result.response(StageRole::Aggregate).source,
        ResponseSource::Model
    );
    let prompts = mock.prompts(&model(StageRole::Aggregate));
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("## architecture [DEGRADED"));
    assert!(!prompts[0].contains("## business [DEGRADED"));
}

#[tokio::test(start_paused = true)]
async fn test_partial_answer_is_low_confidence() {
    let mock = happy_mock();
    mock.add_response(
        &model(StageRole::Business),
        MockResponse::text(r#"{"summary": "Checkout SaaS"}"#),
    );
    let pipeline = pipeline(
        mock.clone(),
        OrchestratorContext::in_memory(10).with_progress(Arc::new(NoOpHandler)),
    );

    let result = pipeline.run(&facts("shop-api")).await;

    assert!(!result.is_degraded());
    assert_eq!(result.metadata.low_confidence_roles, vec![StageRole::Business]);
    let business = result.response(StageRole::Business);
    assert!(business.confidence < 0.5);
    match &business.payload {
        StagePayload::Business(payload) => {
            assert_eq!(payload.summary, "Checkout SaaS");
            assert_eq!(payload.viability_score, vantage::assessment::NEUTRAL_SCORE);
        }
        other => panic!("unexpected payload {:?}", other),
    }
    // Low-confidence payloads are not reused by later runs
    assert_eq!(pipeline.context().cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_write_failure_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().join("cache");
    let cache = CacheStore::open(&cache_dir).unwrap();
    std::fs::remove_dir_all(&cache_dir).unwrap();

    let recorder = Arc::new(RecordingHandler::default());
    let context = OrchestratorContext::new(Arc::new(RateLimiter::per_minute(10)), Arc::new(cache))
        .with_progress(recorder.clone());
    let pipeline = pipeline_with(support::config(), happy_mock(), context);

    let result = pipeline.run(&facts("shop-api")).await;

    assert!(!result.is_degraded());
    let failures: Vec<StageRole> = recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PersistFailed { role, .. } => Some(*role),
            _ => None,
        })
        .collect();
    assert_eq!(failures, StageRole::INDEPENDENT.to_vec());
    assert!(pipeline.context().cache.is_empty());
}

#[test]
fn test_malformed_credentials_are_rejected() {
    let config = VantageConfig::with_api_key("sk-test\nX-Injected: 1");
    let result = PipelineOrchestrator::from_config(&config, OrchestratorContext::in_memory(10));
    assert!(matches!(result, Err(ConfigError::InvalidCredentials(_))));
}

#[test]
fn test_invalid_numeric_settings_are_rejected() {
    let mut config = VantageConfig::with_api_key("sk-test");
    config.max_attempts = 0;
    let result = PipelineOrchestrator::from_config(&config, OrchestratorContext::in_memory(10));
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
}

#[test]
fn test_oversized_cache_age_is_rejected_before_building() {
    let mut config = VantageConfig::with_api_key("sk-test");
    config.cache_max_age_days = u64::MAX;
    let result = PipelineOrchestrator::from_config(&config, OrchestratorContext::in_memory(10));
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
}

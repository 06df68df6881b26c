//! Three independent facet stages, then the aggregator
//!
//! A run resolves every independent role from the cache or through a
//! rate-limited, retried, validated dispatch. Once all three are resolved
//! (with fallbacks where needed) the aggregator runs over their payloads.
//! The run never fails: every per-stage error becomes a degraded fallback.

use super::config::PipelineConfig;
use super::context::OrchestratorContext;
use super::result::{ModelResponse, PipelineResult, ResponseSource, RunMetadata, StageResponses};
use super::single_flight::SingleFlight;
use super::stage::{StageState, StageTracker};
use crate::assessment::{AggregateAssessment, FacetInput, StagePayload, StageRole};
use crate::config::{ConfigError, VantageConfig};
use crate::facts::{ProjectFacts, ProjectFingerprint};
use crate::llm::{CallError, HttpChatClient, InferenceClient, LLMClient};
use crate::progress::ProgressEvent;
use crate::prompt::{DefaultPrompts, PromptBuilder};
use crate::validation::ResponseValidator;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEADLINE_ERROR: &str = "run deadline exceeded";

/// Identity of one dispatch for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct DispatchKey {
    project: String,
    source_hash: String,
    role: StageRole,
    model: String,
    /// Aggregator prompts depend on facet outcomes, so they are part of the key
    prompt_digest: Option<String>,
}

/// Result of a dispatch, shared by every caller that joined it
#[derive(Debug, Clone)]
pub(crate) enum DispatchOutcome {
    Validated {
        model: String,
        raw_text: String,
        payload: StagePayload,
        confidence: f64,
    },
    Failed {
        model: String,
        error: String,
        raw_text: Option<String>,
    },
}

pub(crate) type InFlightDispatches = SingleFlight<DispatchKey, DispatchOutcome>;

/// Cancels the run token when the deadline passes
struct DeadlineTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DeadlineTimer {
    fn start(deadline: std::time::Duration) -> Self {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            trigger.cancel();
        });
        Self { token, handle }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Per-run bookkeeping shared by the stage resolvers
struct RunState<'a> {
    fingerprint: &'a ProjectFingerprint,
    deadline: &'a CancellationToken,
    api_calls: Arc<AtomicU32>,
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    context: OrchestratorContext,
    inference: Arc<InferenceClient>,
    validator: Arc<ResponseValidator>,
    prompts: Arc<dyn PromptBuilder>,
}

impl PipelineOrchestrator {
    /// Validates credentials and model routing; no network activity happens here
    pub fn new(
        config: PipelineConfig,
        context: OrchestratorContext,
        client: Arc<dyn LLMClient>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let inference = InferenceClient::new(
            client,
            Arc::clone(&context.limiter),
            config.models.clone(),
            config.retry_policy(),
            config.request_timeout,
        )
        .with_temperature(config.temperature);
        let validator = ResponseValidator::new(config.confidence_threshold);

        debug!(?config, "Pipeline orchestrator created");

        Ok(Self {
            config,
            context,
            inference: Arc::new(inference),
            validator: Arc::new(validator),
            prompts,
        })
    }

    pub fn with_default_prompts(
        config: PipelineConfig,
        context: OrchestratorContext,
        client: Arc<dyn LLMClient>,
    ) -> Result<Self, ConfigError> {
        Self::new(config, context, client, Arc::new(DefaultPrompts))
    }

    /// Orchestrator talking to the configured HTTP inference service
    pub fn from_config(
        config: &VantageConfig,
        context: OrchestratorContext,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = HttpChatClient::from_config(config)?;
        Self::with_default_prompts(PipelineConfig::from(config), context, Arc::new(client))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.context
    }

    /// Assesses `facts`; always returns a fully populated result
    pub async fn run(&self, facts: &ProjectFacts) -> PipelineResult {
        let started = Instant::now();
        let started_at = Utc::now();
        let fingerprint = facts.fingerprint();
        let timer = DeadlineTimer::start(self.config.deadline);
        let run = RunState {
            fingerprint: &fingerprint,
            deadline: &timer.token,
            api_calls: Arc::new(AtomicU32::new(0)),
        };
        let mut tracker = StageTracker::new();

        info!(fingerprint = %fingerprint, "Starting pipeline run");
        self.emit(ProgressEvent::RunStarted {
            project: fingerprint.project.clone(),
            source_hash: fingerprint.source_hash.clone(),
        });

        let mut resolved: Vec<Option<ModelResponse>> = vec![None; StageRole::INDEPENDENT.len()];
        let mut pending = Vec::new();
        for (index, role) in StageRole::INDEPENDENT.into_iter().enumerate() {
            match self
                .context
                .cache
                .get_fresh(&fingerprint, role, self.config.cache_max_age)
            {
                Some(entry) => {
                    tracker.advance(role, StageState::CacheHit);
                    self.emit(ProgressEvent::StageCacheHit { role });
                    resolved[index] = Some(ModelResponse::from_cache(entry));
                }
                None => pending.push((index, role)),
            }
        }

        let dispatches = pending.iter().map(|(_, role)| {
            let prompt = self.prompts.independent(*role, facts);
            self.resolve_stage(*role, prompt, None, &run)
        });
        let outcomes = join_all(dispatches).await;

        for ((index, role), outcome) in pending.into_iter().zip(outcomes) {
            tracker.advance(role, StageState::Dispatched);
            resolved[index] = Some(
                outcome.unwrap_or_else(|failure| failure.into_fallback(StagePayload::fallback(role))),
            );
        }

        let mut slot = |index: usize| {
            let role = StageRole::INDEPENDENT[index];
            let response = resolved[index].take().unwrap_or_else(|| {
                StageFailure::new(role, self.inference.model_for(role), "stage not resolved")
                    .into_fallback(StagePayload::fallback(role))
            });
            settle(&mut tracker, &response);
            response
        };
        let architecture = slot(0);
        let deployment = slot(1);
        let business = slot(2);
        debug_assert!(tracker.all_done(&StageRole::INDEPENDENT));

        let facets = [&architecture, &deployment, &business];
        let aggregate = self.resolve_aggregate(facts, &facets, &run).await;
        settle(&mut tracker, &aggregate);

        self.persist(&fingerprint, &facets);

        let deadline_exceeded = run.deadline.is_cancelled();
        if deadline_exceeded {
            self.emit(ProgressEvent::DeadlineExceeded {
                elapsed: started.elapsed(),
            });
        }

        let responses = StageResponses {
            architecture,
            deployment,
            business,
            aggregate,
        };

        let metadata = self.metadata(
            &responses,
            started_at,
            started.elapsed(),
            run.api_calls.load(Ordering::SeqCst),
            deadline_exceeded,
        );

        info!(
            fingerprint = %fingerprint,
            elapsed_ms = metadata.elapsed.as_millis() as u64,
            api_calls = metadata.api_calls,
            cache_hits = metadata.cache_hits,
            degraded = ?metadata.degraded_roles,
            "Pipeline run complete"
        );
        self.emit(ProgressEvent::RunCompleted {
            elapsed: metadata.elapsed,
            api_calls: metadata.api_calls,
            cache_hits: metadata.cache_hits,
            degraded: metadata.degraded_roles.len(),
        });

        PipelineResult {
            fingerprint,
            responses,
            metadata,
        }
    }

    async fn resolve_aggregate(
        &self,
        facts: &ProjectFacts,
        facets: &[&ModelResponse],
        run: &RunState<'_>,
    ) -> ModelResponse {
        let inputs: Vec<FacetInput<'_>> = facets
            .iter()
            .map(|facet| FacetInput {
                payload: &facet.payload,
                degraded: facet.degraded,
            })
            .collect();

        let degraded_inputs = inputs.iter().filter(|input| input.degraded).count();
        self.emit(ProgressEvent::AggregatorStarted { degraded_inputs });

        let prompt = self.prompts.aggregate(facts, &inputs);
        let digest = format!("{:x}", md5::compute(prompt.as_bytes()));

        match self
            .resolve_stage(StageRole::Aggregate, prompt, Some(digest), run)
            .await
        {
            Ok(response) => response,
            Err(failure) => failure.into_fallback(StagePayload::Aggregate(
                AggregateAssessment::synthesize(&inputs),
            )),
        }
    }

    /// Dispatches one stage through the single-flight map and waits for it or the deadline
    async fn resolve_stage(
        &self,
        role: StageRole,
        prompt: String,
        prompt_digest: Option<String>,
        run: &RunState<'_>,
    ) -> Result<ModelResponse, StageFailure> {
        let started = Instant::now();
        let model = self.inference.model_for(role).to_string();

        let result = if run.deadline.is_cancelled() {
            Err(StageFailure::new(role, &model, DEADLINE_ERROR))
        } else {
            let key = DispatchKey {
                project: run.fingerprint.project.clone(),
                source_hash: run.fingerprint.source_hash.clone(),
                role,
                model: model.clone(),
                prompt_digest,
            };
            let flight = self.context.in_flight.join_or_start(key, run.deadline, |cancel| {
                dispatch(
                    Arc::clone(&self.inference),
                    Arc::clone(&self.validator),
                    role,
                    prompt,
                    cancel,
                    Arc::clone(&run.api_calls),
                )
            });

            if flight.leader {
                self.emit(ProgressEvent::StageDispatched {
                    role,
                    model: model.clone(),
                });
            } else {
                self.emit(ProgressEvent::StageJoined { role });
            }

            let outcome = tokio::select! {
                biased;
                outcome = flight.future => outcome,
                _ = run.deadline.cancelled() => None,
            };

            match outcome {
                Some(DispatchOutcome::Validated {
                    model,
                    raw_text,
                    payload,
                    confidence,
                }) => Ok(ModelResponse::from_model(
                    role, model, raw_text, payload, confidence,
                )),
                Some(DispatchOutcome::Failed {
                    model,
                    error,
                    raw_text,
                }) => Err(StageFailure {
                    role,
                    model,
                    error,
                    raw_text,
                }),
                None if run.deadline.is_cancelled() => {
                    Err(StageFailure::new(role, &model, DEADLINE_ERROR))
                }
                None => Err(StageFailure::new(role, &model, "dispatch task aborted")),
            }
        };

        let (degraded, confidence) = match &result {
            Ok(response) => (false, response.confidence),
            Err(failure) => {
                warn!(role = %role, model = %failure.model, error = %failure.error, "Stage falling back");
                (true, 0.0)
            }
        };
        self.emit(ProgressEvent::StageResolved {
            role,
            degraded,
            confidence,
            elapsed: started.elapsed(),
        });

        result
    }

    /// Writes fresh, validated, confident facet payloads to the cache
    fn persist(&self, fingerprint: &ProjectFingerprint, facets: &[&ModelResponse]) {
        for facet in facets {
            if facet.source != ResponseSource::Model
                || facet.degraded
                || self.validator.is_low_confidence(facet.confidence)
            {
                continue;
            }
            if let Err(e) = self.context.cache.put(
                fingerprint,
                facet.role,
                facet.payload.clone(),
                &fingerprint.source_hash,
                facet.confidence,
                &facet.model,
            ) {
                warn!(role = %facet.role, error = %e, "Failed to cache stage payload");
                self.emit(ProgressEvent::PersistFailed {
                    role: facet.role,
                    error: e.to_string(),
                });
            }
        }
    }

    fn metadata(
        &self,
        responses: &StageResponses,
        started_at: chrono::DateTime<Utc>,
        elapsed: std::time::Duration,
        api_calls: u32,
        deadline_exceeded: bool,
    ) -> RunMetadata {
        let mut models_used = BTreeSet::new();
        let mut degraded_roles = Vec::new();
        let mut low_confidence_roles = Vec::new();
        let mut cache_hits = 0;

        for response in responses.iter() {
            match response.source {
                ResponseSource::Fallback => degraded_roles.push(response.role),
                ResponseSource::Model | ResponseSource::Cache => {
                    models_used.insert(response.model.clone());
                    if self.validator.is_low_confidence(response.confidence) {
                        low_confidence_roles.push(response.role);
                    }
                }
            }
            if response.is_cache_hit() {
                cache_hits += 1;
            }
        }

        RunMetadata {
            started_at,
            elapsed,
            cache_hits,
            api_calls,
            models_used: models_used.into_iter().collect(),
            degraded_roles,
            low_confidence_roles,
            deadline_exceeded,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        self.context.progress.on_progress(&event);
    }
}

/// Records the terminal transitions of a resolved stage
fn settle(tracker: &mut StageTracker, response: &ModelResponse) {
    let role = response.role;
    match response.source {
        ResponseSource::Cache => {}
        ResponseSource::Model => {
            if tracker.state(role) == StageState::Pending {
                tracker.advance(role, StageState::Dispatched);
            }
            tracker.advance(role, StageState::Succeeded);
        }
        ResponseSource::Fallback => {
            tracker.advance(role, StageState::Fallback);
        }
    }
    tracker.advance(role, StageState::Done);
}

/// Calls the model and validates its answer; runs in its own task
///
/// `cancel` belongs to the flight and fires only once every run waiting on
/// this dispatch has passed its deadline.
async fn dispatch(
    inference: Arc<InferenceClient>,
    validator: Arc<ResponseValidator>,
    role: StageRole,
    prompt: String,
    cancel: CancellationToken,
    api_calls: Arc<AtomicU32>,
) -> DispatchOutcome {
    let model = inference.model_for(role).to_string();
    let success = match inference.call(role, &prompt, &cancel, &api_calls).await {
        Ok(success) => success,
        Err(CallError::Cancelled) => {
            return DispatchOutcome::Failed {
                model,
                error: DEADLINE_ERROR.to_string(),
                raw_text: None,
            }
        }
        Err(e) => {
            return DispatchOutcome::Failed {
                model,
                error: e.to_string(),
                raw_text: None,
            }
        }
    };

    match validator.parse(&success.text, role) {
        Ok(validated) => {
            debug!(
                role = %role,
                attempts = success.attempts,
                confidence = validated.confidence,
                "Stage response validated"
            );
            DispatchOutcome::Validated {
                model: success.model,
                raw_text: success.text,
                payload: validated.payload,
                confidence: validated.confidence,
            }
        }
        Err(e) => {
            warn!(role = %role, error = %e, "Unparseable model response");
            DispatchOutcome::Failed {
                model: success.model,
                error: e.to_string(),
                raw_text: Some(success.text),
            }
        }
    }
}

/// A stage that could not produce a validated model answer
#[derive(Debug)]
struct StageFailure {
    role: StageRole,
    model: String,
    error: String,
    raw_text: Option<String>,
}

impl StageFailure {
    fn new(role: StageRole, model: &str, error: &str) -> Self {
        Self {
            role,
            model: model.to_string(),
            error: error.to_string(),
            raw_text: None,
        }
    }

    fn into_fallback(self, payload: StagePayload) -> ModelResponse {
        ModelResponse::fallback(self.role, self.model, payload, self.error, self.raw_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRouting;
    use crate::facts::SourceFile;
    use crate::llm::{MockLLMClient, MockResponse};
    use crate::progress::{NoOpHandler, ProgressHandler};
    use std::sync::Mutex;
    use std::time::Duration;

    const ARCHITECTURE: &str = r#"{"summary": "Modular monolith", "patterns": ["layered"],
        "strengths": ["clear boundaries"], "weaknesses": ["shared database"],
        "complexity_score": 6, "recommendations": ["extract billing"]}"#;
    const DEPLOYMENT: &str = r#"{"summary": "Containerized", "readiness": "high",
        "platforms": ["kubernetes"], "risks": ["no rollback plan"], "readiness_score": 8,
        "recommendations": ["add canaries"]}"#;
    const BUSINESS: &str = r#"{"summary": "B2B SaaS", "target_users": "retailers",
        "value_proposition": "faster checkout", "monetization": "subscription",
        "risks": ["crowded market"], "viability_score": 7}"#;
    const AGGREGATE: &str = r#"```json
{"executive_summary": "Solid product", "overall_score": 7.5,
 "key_risks": ["shared database"], "priorities": ["add canaries"]}
```"#;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressHandler for RecordingHandler {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn model(role: StageRole) -> String {
        format!("{}-model", role)
    }

    fn routing() -> ModelRouting {
        let mut routing = ModelRouting::default();
        for role in StageRole::ALL {
            routing.set(role, model(role));
        }
        routing
    }

    fn facts() -> ProjectFacts {
        ProjectFacts::new("shop-api").with_source_files(vec![
            SourceFile::new("src/main.rs", "d1"),
            SourceFile::new("Dockerfile", "d2"),
        ])
    }

    fn script(mock: &MockLLMClient, role: StageRole, response: MockResponse) {
        mock.add_response(&model(role), response);
    }

    fn script_happy_path(mock: &MockLLMClient) {
        script(mock, StageRole::Architecture, MockResponse::text(ARCHITECTURE));
        script(mock, StageRole::Deployment, MockResponse::text(DEPLOYMENT));
        script(mock, StageRole::Business, MockResponse::text(BUSINESS));
        script(mock, StageRole::Aggregate, MockResponse::text(AGGREGATE));
    }

    fn orchestrator(mock: Arc<MockLLMClient>, context: OrchestratorContext) -> PipelineOrchestrator {
        PipelineOrchestrator::with_default_prompts(
            PipelineConfig::new("sk-test").with_models(routing()),
            context,
            mock,
        )
        .unwrap()
    }

    fn quiet_context() -> OrchestratorContext {
        OrchestratorContext::in_memory(10).with_progress(Arc::new(NoOpHandler))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_run_dispatches_every_stage() {
        let mock = Arc::new(MockLLMClient::new());
        script_happy_path(&mock);
        let pipeline = orchestrator(mock.clone(), quiet_context());

        let result = pipeline.run(&facts()).await;

        assert_eq!(result.metadata.api_calls, 4);
        assert_eq!(result.metadata.cache_hits, 0);
        assert!(result.metadata.degraded_roles.is_empty());
        assert!(!result.metadata.deadline_exceeded);
        assert_eq!(result.metadata.models_used.len(), 4);
        assert_eq!(result.overall_score(), 7.5);
        assert_eq!(result.fingerprint, facts().fingerprint());
        assert_eq!(pipeline.context().cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_answer_falls_back_without_retry() {
        let mock = Arc::new(MockLLMClient::new());
        for role in StageRole::INDEPENDENT {
            script(&mock, role, MockResponse::text("I'd rather not say."));
        }
        script(&mock, StageRole::Aggregate, MockResponse::text(AGGREGATE));
        let pipeline = orchestrator(mock.clone(), quiet_context());

        let result = pipeline.run(&facts()).await;

        assert_eq!(mock.total_calls(), 4);
        assert_eq!(result.metadata.degraded_roles, StageRole::INDEPENDENT.to_vec());
        let business = result.response(StageRole::Business);
        assert_eq!(business.source, ResponseSource::Fallback);
        assert_eq!(business.raw_text.as_deref(), Some("I'd rather not say."));
        assert!(pipeline.context().cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregator_failure_synthesizes_from_facets() {
        let mock = Arc::new(MockLLMClient::new());
        script(&mock, StageRole::Architecture, MockResponse::text(ARCHITECTURE));
        script(&mock, StageRole::Deployment, MockResponse::text(DEPLOYMENT));
        script(&mock, StageRole::Business, MockResponse::text(BUSINESS));
        script(
            &mock,
            StageRole::Aggregate,
            MockResponse::error(CallError::from_status(401, "bad key", None)),
        );
        let pipeline = orchestrator(mock.clone(), quiet_context());

        let result = pipeline.run(&facts()).await;

        let aggregate = result.response(StageRole::Aggregate);
        assert!(aggregate.degraded);
        match &aggregate.payload {
            StagePayload::Aggregate(a) => {
                // Mean of 10 - 6, 8 and 7
                assert!((a.overall_score - 19.0 / 3.0).abs() < 1e-9);
                assert_eq!(a.facet_summaries.len(), 3);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(result.metadata.degraded_roles, vec![StageRole::Aggregate]);
        assert_eq!(mock.calls(&model(StageRole::Aggregate)), 1);
        // Facets still persist when only the aggregator failed
        assert_eq!(pipeline.context().cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_is_reported_and_not_cached() {
        let mock = Arc::new(MockLLMClient::new());
        script(
            &mock,
            StageRole::Architecture,
            MockResponse::text(r#"{"summary": "Thin answer"}"#),
        );
        script(&mock, StageRole::Deployment, MockResponse::text(DEPLOYMENT));
        script(&mock, StageRole::Business, MockResponse::text(BUSINESS));
        script(&mock, StageRole::Aggregate, MockResponse::text(AGGREGATE));
        let pipeline = orchestrator(mock, quiet_context());

        let result = pipeline.run(&facts()).await;

        assert_eq!(result.metadata.low_confidence_roles, vec![StageRole::Architecture]);
        assert!(result.metadata.degraded_roles.is_empty());
        assert_eq!(pipeline.context().cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_follow_the_run() {
        let mock = Arc::new(MockLLMClient::new());
        script_happy_path(&mock);
        let handler = Arc::new(RecordingHandler::default());
        let context = OrchestratorContext::in_memory(10).with_progress(handler.clone());
        let pipeline = orchestrator(mock, context);

        pipeline.run(&facts()).await;

        let events = handler.events.lock().unwrap().clone();
        assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::RunCompleted { api_calls: 4, .. })
        ));

        let aggregator_started = events
            .iter()
            .position(|e| matches!(e, ProgressEvent::AggregatorStarted { .. }))
            .unwrap();
        let facets_resolved_before = events[..aggregator_started]
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StageResolved { .. }))
            .count();
        assert_eq!(facets_resolved_before, 3);
    }

    #[test]
    fn test_construction_rejects_missing_credentials() {
        let result = PipelineOrchestrator::with_default_prompts(
            PipelineConfig::default(),
            quiet_context(),
            Arc::new(MockLLMClient::new()),
        );
        assert!(matches!(result, Err(ConfigError::MissingCredentials)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_timer_cancels_token() {
        let timer = DeadlineTimer::start(Duration::from_secs(5));
        let token = timer.token.clone();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let timer = DeadlineTimer::start(Duration::from_secs(5));
        let token = timer.token.clone();
        drop(timer);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!token.is_cancelled());
    }
}

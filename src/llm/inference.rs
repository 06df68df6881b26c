//! Rate-limited, retrying inference calls
//!
//! [`InferenceClient`] turns one logical stage call into up to
//! `max_attempts` transport requests. Every attempt first takes a token from
//! the shared [`RateLimiter`], and runs under the per-call timeout. The run
//! deadline is observed cooperatively: it interrupts limiter waits and
//! backoff sleeps, but an attempt already on the wire is allowed to finish.

use super::client::LLMClient;
use super::error::CallError;
use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::types::LLMRequest;
use crate::assessment::StageRole;
use crate::config::ModelRouting;
use crate::rate_limit::RateLimiter;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Text returned by a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct CallSuccess {
    pub text: String,
    pub model: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub response_time: Duration,
}

pub struct InferenceClient {
    transport: Arc<dyn LLMClient>,
    limiter: Arc<RateLimiter>,
    routing: ModelRouting,
    policy: RetryPolicy,
    request_timeout: Duration,
    temperature: f32,
}

impl InferenceClient {
    pub fn new(
        transport: Arc<dyn LLMClient>,
        limiter: Arc<RateLimiter>,
        routing: ModelRouting,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            limiter,
            routing,
            policy,
            request_timeout,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model_for(&self, role: StageRole) -> &str {
        self.routing.model_for(role)
    }

    pub fn routing(&self) -> &ModelRouting {
        &self.routing
    }

    /// Calls the model routed for `role`, retrying per the policy
    ///
    /// `network_calls` is incremented once per request actually issued.
    pub async fn call(
        &self,
        role: StageRole,
        prompt: &str,
        cancel: &CancellationToken,
        network_calls: &AtomicU32,
    ) -> Result<CallSuccess, CallError> {
        let model = self.model_for(role).to_string();
        let mut state = RetryState::new(self.policy.clone());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = self.limiter.acquire() => {}
            }

            let attempt = state.begin_attempt();
            network_calls.fetch_add(1, Ordering::SeqCst);
            debug!(role = %role, model = %model, attempt, "Dispatching inference request");

            let request =
                LLMRequest::prompt(model.clone(), prompt).with_temperature(self.temperature);
            let error = match tokio::time::timeout(self.request_timeout, self.transport.chat(request))
                .await
            {
                Ok(Ok(response)) => {
                    return Ok(CallSuccess {
                        text: response.content,
                        model,
                        attempts: attempt,
                        response_time: response.response_time,
                    });
                }
                Ok(Err(error)) => error,
                Err(_) => CallError::timeout(self.request_timeout.as_secs()),
            };

            match state.on_failure(&error) {
                RetryDecision::GiveUp => {
                    warn!(role = %role, model = %model, attempts = attempt, error = %error, "Inference call failed");
                    return Err(error);
                }
                RetryDecision::Retry { delay } => {
                    if cancel.is_cancelled() {
                        return Err(CallError::Cancelled);
                    }
                    warn!(
                        role = %role,
                        model = %model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Inference call failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CallError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("transport", &self.transport.name())
            .field("routing", &self.routing)
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

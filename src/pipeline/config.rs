use crate::config::{
    validate_api_key, ConfigError, ModelRouting, VantageConfig, DEFAULT_CACHE_MAX_AGE_DAYS,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_RUN_DEADLINE_SECS, DEFAULT_TEMPERATURE,
};
use crate::llm::RetryPolicy;
use std::fmt;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Per-orchestrator settings
#[derive(Clone)]
pub struct PipelineConfig {
    pub api_key: Option<String>,
    pub models: ModelRouting,
    /// Allow-list of model identifiers; empty accepts any well-formed id
    pub known_models: Vec<String>,
    /// Wall-clock budget of one run
    pub deadline: Duration,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub temperature: f32,
    pub cache_max_age: Duration,
    pub confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            models: ModelRouting::default(),
            known_models: Vec::new(),
            deadline: Duration::from_secs(DEFAULT_RUN_DEADLINE_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            temperature: DEFAULT_TEMPERATURE,
            cache_max_age: Duration::from_secs(
                DEFAULT_CACHE_MAX_AGE_DAYS.saturating_mul(SECS_PER_DAY),
            ),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    pub fn with_models(mut self, models: ModelRouting) -> Self {
        self.models = models;
        self
    }

    pub fn with_known_models(mut self, known_models: Vec<String>) -> Self {
        self.known_models = known_models;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_cache_max_age(mut self, cache_max_age: Duration) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    pub fn with_confidence_threshold(mut self, confidence_threshold: f64) -> Self {
        self.confidence_threshold = confidence_threshold;
        self
    }

    /// Retry schedule; single backoffs never exceed the per-call timeout
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.request_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_key(self.api_key.as_deref())?;
        self.models.validate(&self.known_models)?;
        if self.deadline.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "Run deadline must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be positive".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&VantageConfig> for PipelineConfig {
    fn from(config: &VantageConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            known_models: config.known_models.clone(),
            deadline: Duration::from_secs(config.run_deadline_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_attempts: config.max_attempts,
            temperature: config.temperature,
            cache_max_age: Duration::from_secs(
                config.cache_max_age_days.saturating_mul(SECS_PER_DAY),
            ),
            confidence_threshold: config.confidence_threshold,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("models", &self.models)
            .field("known_models", &self.known_models)
            .field("deadline", &self.deadline)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("temperature", &self.temperature)
            .field("cache_max_age", &self.cache_max_age)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish()
    }
}

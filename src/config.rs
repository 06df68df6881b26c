//! Configuration management for vantage
//!
//! Settings are loaded from environment variables with sensible defaults.
//! [`VantageConfig::validate`] must pass before any network activity; the
//! orchestrator calls it on construction.
//!
//! # Environment Variables
//!
//! - `VANTAGE_API_BASE_URL`: inference endpoint - default: "https://api.openai.com/v1"
//! - `VANTAGE_API_KEY`: bearer credential - **required**
//! - `VANTAGE_ARCHITECTURE_MODEL`, `VANTAGE_DEPLOYMENT_MODEL`, `VANTAGE_BUSINESS_MODEL`,
//!   `VANTAGE_AGGREGATE_MODEL`: model per stage role
//! - `VANTAGE_KNOWN_MODELS`: comma-separated allow-list of model identifiers - default: any
//! - `VANTAGE_RATE_LIMIT_PER_MINUTE`: requests per minute - default: "10"
//! - `VANTAGE_REQUEST_TIMEOUT`: per-call timeout in seconds - default: "120"
//! - `VANTAGE_MAX_ATTEMPTS`: attempts per call including the first - default: "3"
//! - `VANTAGE_RUN_DEADLINE`: wall-clock budget of one run in seconds - default: "180"
//! - `VANTAGE_TEMPERATURE`: sampling temperature - default: "0.2"
//! - `VANTAGE_CACHE_ENABLED`: enable result caching (true|false) - default: "true"
//! - `VANTAGE_CACHE_DIR`: cache directory - default: user cache dir + "vantage"
//! - `VANTAGE_CACHE_MAX_AGE_DAYS`: cache entry lifetime - default: "7"
//! - `VANTAGE_CONFIDENCE_THRESHOLD`: low-confidence cutoff - default: "0.5"
//! - `VANTAGE_LOG_LEVEL`: logging level - default: "info"

use crate::assessment::StageRole;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_FACET_MODEL: &str = "gpt-4o-mini";
const DEFAULT_AGGREGATE_MODEL: &str = "gpt-4o";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CACHE_ENABLED: bool = true;
pub(crate) const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 10;
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_RUN_DEADLINE_SECS: u64 = 180;
pub(crate) const DEFAULT_TEMPERATURE: f32 = 0.2;
pub(crate) const DEFAULT_CACHE_MAX_AGE_DAYS: u64 = 7;
const MAX_CACHE_MAX_AGE_DAYS: u64 = 3650;
pub(crate) const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Configuration errors
///
/// All of these are fatal: they indicate a programming or deployment mistake
/// and are raised before any call to the inference service.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Inference credentials not configured. Set VANTAGE_API_KEY")]
    MissingCredentials,

    #[error("Invalid inference credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unknown or misconfigured model '{model}' for {role} stage")]
    UnknownModel { role: StageRole, model: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Rejects a missing, blank or malformed bearer credential
pub fn validate_api_key(api_key: Option<&str>) -> Result<(), ConfigError> {
    let api_key = api_key.ok_or(ConfigError::MissingCredentials)?;
    if api_key.trim().is_empty() {
        return Err(ConfigError::MissingCredentials);
    }
    if api_key
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || !c.is_ascii())
    {
        return Err(ConfigError::InvalidCredentials(
            "API key contains whitespace or non-ASCII characters".to_string(),
        ));
    }
    Ok(())
}

/// Model identifier per stage role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRouting {
    pub architecture: String,
    pub deployment: String,
    pub business: String,
    pub aggregate: String,
}

impl ModelRouting {
    /// Routes every role to the same model
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            architecture: model.clone(),
            deployment: model.clone(),
            business: model.clone(),
            aggregate: model,
        }
    }

    pub fn model_for(&self, role: StageRole) -> &str {
        match role {
            StageRole::Architecture => &self.architecture,
            StageRole::Deployment => &self.deployment,
            StageRole::Business => &self.business,
            StageRole::Aggregate => &self.aggregate,
        }
    }

    pub fn set(&mut self, role: StageRole, model: impl Into<String>) {
        let model = model.into();
        match role {
            StageRole::Architecture => self.architecture = model,
            StageRole::Deployment => self.deployment = model,
            StageRole::Business => self.business = model,
            StageRole::Aggregate => self.aggregate = model,
        }
    }

    /// Checks every route against the identifier syntax and an optional allow-list
    pub fn validate(&self, known_models: &[String]) -> Result<(), ConfigError> {
        for role in StageRole::ALL {
            let model = self.model_for(role);
            let well_formed = !model.is_empty()
                && model
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_.:/@".contains(c));
            let known = known_models.is_empty() || known_models.iter().any(|m| m == model);
            if !well_formed || !known {
                return Err(ConfigError::UnknownModel {
                    role,
                    model: model.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ModelRouting {
    fn default() -> Self {
        Self {
            architecture: DEFAULT_FACET_MODEL.to_string(),
            deployment: DEFAULT_FACET_MODEL.to_string(),
            business: DEFAULT_FACET_MODEL.to_string(),
            aggregate: DEFAULT_AGGREGATE_MODEL.to_string(),
        }
    }
}

/// Main configuration structure for vantage
#[derive(Clone)]
pub struct VantageConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub models: ModelRouting,
    /// Allow-list of model identifiers; empty accepts any well-formed id
    pub known_models: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub run_deadline_secs: u64,
    pub temperature: f32,
    pub cache_enabled: bool,
    pub cache_dir: Option<PathBuf>,
    pub cache_max_age_days: u64,
    pub confidence_threshold: f64,
    pub log_level: String,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Default for VantageConfig {
    /// Loads configuration from `VANTAGE_*` environment variables with defaults
    fn default() -> Self {
        let mut models = ModelRouting::default();
        for role in StageRole::ALL {
            let key = format!("VANTAGE_{}_MODEL", role.as_str().to_uppercase());
            if let Ok(model) = env::var(&key) {
                models.set(role, model.trim());
            }
        }

        let known_models = env::var("VANTAGE_KNOWN_MODELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let cache_enabled = env_parse("VANTAGE_CACHE_ENABLED").unwrap_or(DEFAULT_CACHE_ENABLED);
        let cache_dir = env::var("VANTAGE_CACHE_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                if cache_enabled {
                    Some(
                        dirs::cache_dir()
                            .unwrap_or_else(env::temp_dir)
                            .join("vantage"),
                    )
                } else {
                    None
                }
            });

        Self {
            api_base_url: env::var("VANTAGE_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            api_key: env::var("VANTAGE_API_KEY").ok(),
            models,
            known_models,
            rate_limit_per_minute: env_parse("VANTAGE_RATE_LIMIT_PER_MINUTE")
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
            request_timeout_secs: env_parse("VANTAGE_REQUEST_TIMEOUT")
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: env_parse("VANTAGE_MAX_ATTEMPTS").unwrap_or(DEFAULT_MAX_ATTEMPTS),
            run_deadline_secs: env_parse("VANTAGE_RUN_DEADLINE")
                .unwrap_or(DEFAULT_RUN_DEADLINE_SECS),
            temperature: env_parse("VANTAGE_TEMPERATURE").unwrap_or(DEFAULT_TEMPERATURE),
            cache_enabled,
            cache_dir,
            cache_max_age_days: env_parse("VANTAGE_CACHE_MAX_AGE_DAYS")
                .unwrap_or(DEFAULT_CACHE_MAX_AGE_DAYS),
            confidence_threshold: env_parse("VANTAGE_CONFIDENCE_THRESHOLD")
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            log_level: env::var("VANTAGE_LOG_LEVEL")
                .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        }
    }
}

impl VantageConfig {
    /// Configuration with built-in defaults and the given credential, ignoring the environment
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: Some(api_key.into()),
            models: ModelRouting::default(),
            known_models: Vec::new(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            run_deadline_secs: DEFAULT_RUN_DEADLINE_SECS,
            temperature: DEFAULT_TEMPERATURE,
            cache_enabled: DEFAULT_CACHE_ENABLED,
            cache_dir: None,
            cache_max_age_days: DEFAULT_CACHE_MAX_AGE_DAYS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Checks credentials, model routing and numeric ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_key(self.api_key.as_deref())?;
        self.models.validate(&self.known_models)?;

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationFailed(format!(
                "API base URL must be http(s): {}",
                self.api_base_url
            )));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::ValidationFailed(
                "Rate limit must allow at least 1 request per minute".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be between 1 second and 10 minutes".to_string(),
            ));
        }
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::ValidationFailed(
                "Max attempts must be between 1 and 10".to_string(),
            ));
        }
        if self.run_deadline_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Run deadline must be at least 1 second".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }
        if self.cache_max_age_days == 0 || self.cache_max_age_days > MAX_CACHE_MAX_AGE_DAYS {
            return Err(ConfigError::ValidationFailed(format!(
                "Cache max age must be between 1 and {} days, got {}",
                MAX_CACHE_MAX_AGE_DAYS, self.cache_max_age_days
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "Confidence threshold must be between 0.0 and 1.0, got {}",
                self.confidence_threshold
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    /// Converts configuration to a display map; the credential is never included
    pub fn to_display_map(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();

        map.insert("api_base_url".to_string(), self.api_base_url.clone());
        map.insert(
            "api_key".to_string(),
            if self.api_key.is_some() { "<set>" } else { "<unset>" }.to_string(),
        );
        for role in StageRole::ALL {
            map.insert(
                format!("{}_model", role.as_str()),
                self.models.model_for(role).to_string(),
            );
        }
        map.insert(
            "rate_limit_per_minute".to_string(),
            self.rate_limit_per_minute.to_string(),
        );
        map.insert(
            "request_timeout_secs".to_string(),
            self.request_timeout_secs.to_string(),
        );
        map.insert("max_attempts".to_string(), self.max_attempts.to_string());
        map.insert(
            "run_deadline_secs".to_string(),
            self.run_deadline_secs.to_string(),
        );
        map.insert("cache_enabled".to_string(), self.cache_enabled.to_string());
        if let Some(ref dir) = self.cache_dir {
            map.insert("cache_dir".to_string(), dir.display().to_string());
        }
        map.insert(
            "cache_max_age_days".to_string(),
            self.cache_max_age_days.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());

        map
    }
}

impl fmt::Debug for VantageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VantageConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("models", &self.models)
            .field("known_models", &self.known_models)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("run_deadline_secs", &self.run_deadline_secs)
            .field("temperature", &self.temperature)
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_dir", &self.cache_dir)
            .field("cache_max_age_days", &self.cache_max_age_days)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl fmt::Display for VantageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Vantage Configuration:")?;
        writeln!(f, "  API Base URL: {}", self.api_base_url)?;
        writeln!(
            f,
            "  API Key: {}",
            if self.api_key.is_some() { "<set>" } else { "<unset>" }
        )?;
        for role in StageRole::ALL {
            writeln!(f, "  {} Model: {}", role, self.models.model_for(role))?;
        }
        writeln!(f, "  Rate Limit: {}/min", self.rate_limit_per_minute)?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Max Attempts: {}", self.max_attempts)?;
        writeln!(f, "  Run Deadline: {}s", self.run_deadline_secs)?;
        writeln!(f, "  Cache Enabled: {}", self.cache_enabled)?;
        if let Some(ref dir) = self.cache_dir {
            writeln!(f, "  Cache Dir: {}", dir.display())?;
        }
        writeln!(f, "  Cache Max Age: {} days", self.cache_max_age_days)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

//! Shared resources of every orchestrator in the process

use std::sync::Arc;

use crate::cache::{CacheError, CacheStore};
use crate::config::VantageConfig;
use crate::progress::{LoggingHandler, ProgressHandler};
use crate::rate_limit::RateLimiter;

use super::orchestrator::InFlightDispatches;

/// Long-lived dependencies shared across runs and orchestrators
///
/// Cloning is cheap and shares the same limiter, cache and in-flight map, so
/// all pipelines built from clones of one context respect one rate budget and
/// deduplicate each other's dispatches.
#[derive(Clone)]
pub struct OrchestratorContext {
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheStore>,
    pub progress: Arc<dyn ProgressHandler>,
    pub(crate) in_flight: Arc<InFlightDispatches>,
}

impl OrchestratorContext {
    pub fn new(limiter: Arc<RateLimiter>, cache: Arc<CacheStore>) -> Self {
        Self {
            limiter,
            cache,
            progress: Arc::new(LoggingHandler),
            in_flight: Arc::new(InFlightDispatches::new()),
        }
    }

    /// In-memory cache and a limiter of `requests_per_minute`
    pub fn in_memory(requests_per_minute: u32) -> Self {
        Self::new(
            Arc::new(RateLimiter::per_minute(requests_per_minute)),
            Arc::new(CacheStore::in_memory()),
        )
    }

    /// Opens the configured cache directory, or an in-memory cache when caching is off
    pub fn from_config(config: &VantageConfig) -> Result<Self, CacheError> {
        let cache = match (&config.cache_dir, config.cache_enabled) {
            (Some(dir), true) => CacheStore::open(dir)?,
            _ => CacheStore::in_memory(),
        };
        Ok(Self::new(
            Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute)),
            Arc::new(cache),
        ))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Dispatches currently shared through the single-flight map
    pub fn in_flight(&self) -> usize {
        self.in_flight.in_flight()
    }
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("limiter_capacity", &self.limiter.capacity())
            .field("cache", &self.cache.directory())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_context() {
        let context = OrchestratorContext::in_memory(10);
        assert_eq!(context.limiter.capacity(), 10);
        assert!(context.cache.directory().is_none());
        assert_eq!(context.in_flight(), 0);
    }

    #[test]
    fn test_clones_share_resources() {
        let context = OrchestratorContext::in_memory(10);
        let clone = context.clone();
        assert!(Arc::ptr_eq(&context.limiter, &clone.limiter));
        assert!(Arc::ptr_eq(&context.cache, &clone.cache));
        assert!(Arc::ptr_eq(&context.in_flight, &clone.in_flight));
    }

    #[test]
    fn test_from_config_opens_cache_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = VantageConfig::with_api_key("sk-test");
        config.cache_dir = Some(dir.path().join("cache"));
        config.rate_limit_per_minute = 30;

        let context = OrchestratorContext::from_config(&config).unwrap();
        assert_eq!(context.limiter.capacity(), 30);
        assert_eq!(context.cache.directory(), Some(dir.path().join("cache").as_path()));
        assert!(dir.path().join("cache").is_dir());
    }

    #[test]
    fn test_disabled_cache_is_in_memory() {
        let dir = TempDir::new().unwrap();
        let mut config = VantageConfig::with_api_key("sk-test");
        config.cache_dir = Some(dir.path().to_path_buf());
        config.cache_enabled = false;

        let context = OrchestratorContext::from_config(&config).unwrap();
        assert!(context.cache.directory().is_none());
    }
}

//! Progress handler trait and events

use crate::assessment::StageRole;
use std::time::Duration;

/// Events emitted while a pipeline run progresses
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Run started for a fingerprinted project
    RunStarted { project: String, source_hash: String },

    /// Stage answered from the cache
    StageCacheHit { role: StageRole },

    /// Stage sent to the inference service
    StageDispatched { role: StageRole, model: String },

    /// Stage attached to a dispatch already in flight for the same key
    StageJoined { role: StageRole },

    /// Stage reached its final payload
    StageResolved {
        role: StageRole,
        degraded: bool,
        confidence: f64,
        elapsed: Duration,
    },

    /// All facets resolved, aggregator about to run
    AggregatorStarted { degraded_inputs: usize },

    /// Run deadline expired; unresolved stages fall back
    DeadlineExceeded { elapsed: Duration },

    /// A fresh payload could not be written to the cache
    PersistFailed { role: StageRole, error: String },

    /// Run finished with a full result
    RunCompleted {
        elapsed: Duration,
        api_calls: u32,
        cache_hits: u32,
        degraded: usize,
    },
}

/// Trait for handling progress events during a run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        NoOpHandler.on_progress(&ProgressEvent::StageCacheHit {
            role: StageRole::Business,
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::RunStarted {
            project: "shop-api".to_string(),
            source_hash: "abc123".to_string(),
        });
        handler.on_progress(&ProgressEvent::AggregatorStarted { degraded_inputs: 0 });
        handler.on_progress(&ProgressEvent::RunCompleted {
            elapsed: Duration::from_secs(5),
            api_calls: 4,
            cache_hits: 0,
            degraded: 0,
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::StageDispatched {
            role: StageRole::Architecture,
            model: "gpt-4o-mini".to_string(),
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("StageDispatched"));
        assert!(debug_str.contains("Architecture"));
    }
}

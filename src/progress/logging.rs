//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                project,
                source_hash,
            } => {
                info!(project = %project, source_hash = %source_hash, "Starting assessment run");
            }
            ProgressEvent::StageCacheHit { role } => {
                info!(role = %role, "Stage served from cache");
            }
            ProgressEvent::StageDispatched { role, model } => {
                debug!(role = %role, model = %model, "Dispatching stage");
            }
            ProgressEvent::StageJoined { role } => {
                debug!(role = %role, "Joined in-flight dispatch");
            }
            ProgressEvent::StageResolved {
                role,
                degraded,
                confidence,
                elapsed,
            } => {
                if *degraded {
                    warn!(
                        role = %role,
                        elapsed_ms = elapsed.as_millis(),
                        "Stage resolved with fallback"
                    );
                } else {
                    info!(
                        role = %role,
                        confidence,
                        elapsed_ms = elapsed.as_millis(),
                        "Stage resolved"
                    );
                }
            }
            ProgressEvent::AggregatorStarted { degraded_inputs } => {
                info!(degraded_inputs, "Starting aggregator");
            }
            ProgressEvent::DeadlineExceeded { elapsed } => {
                warn!(elapsed_ms = elapsed.as_millis(), "Run deadline exceeded");
            }
            ProgressEvent::PersistFailed { role, error } => {
                warn!(role = %role, error = %error, "Failed to persist stage payload");
            }
            ProgressEvent::RunCompleted {
                elapsed,
                api_calls,
                cache_hits,
                degraded,
            } => {
                info!(
                    elapsed_ms = elapsed.as_millis(),
                    api_calls,
                    cache_hits,
                    degraded,
                    "Assessment run complete"
                );
            }
        }
    }
}

//! Run output types

use crate::assessment::{StagePayload, StageRole};
use crate::cache::CacheEntry;
use crate::facts::ProjectFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a stage payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Model,
    Cache,
    Fallback,
}

/// Final answer of one stage; always carries a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub role: StageRole,
    pub model: String,
    /// Text returned by the model, when one was received
    pub raw_text: Option<String>,
    pub payload: StagePayload,
    pub confidence: f64,
    pub degraded: bool,
    pub source: ResponseSource,
    /// Why the stage fell back
    pub error: Option<String>,
}

impl ModelResponse {
    pub fn from_model(
        role: StageRole,
        model: impl Into<String>,
        raw_text: String,
        payload: StagePayload,
        confidence: f64,
    ) -> Self {
        Self {
            role,
            model: model.into(),
            raw_text: Some(raw_text),
            payload,
            confidence,
            degraded: false,
            source: ResponseSource::Model,
            error: None,
        }
    }

    pub fn from_cache(entry: CacheEntry) -> Self {
        Self {
            role: entry.role,
            model: entry.model,
            raw_text: None,
            payload: entry.payload,
            confidence: entry.confidence,
            degraded: false,
            source: ResponseSource::Cache,
            error: None,
        }
    }

    /// Degraded response carrying `payload` in place of a model answer
    pub fn fallback(
        role: StageRole,
        model: impl Into<String>,
        payload: StagePayload,
        error: impl Into<String>,
        raw_text: Option<String>,
    ) -> Self {
        Self {
            role,
            model: model.into(),
            raw_text,
            payload,
            confidence: 0.0,
            degraded: true,
            source: ResponseSource::Fallback,
            error: Some(error.into()),
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResponses {
    pub architecture: ModelResponse,
    pub deployment: ModelResponse,
    pub business: ModelResponse,
    pub aggregate: ModelResponse,
}

impl StageResponses {
    pub fn get(&self, role: StageRole) -> &ModelResponse {
        match role {
            StageRole::Architecture => &self.architecture,
            StageRole::Deployment => &self.deployment,
            StageRole::Business => &self.business,
            StageRole::Aggregate => &self.aggregate,
        }
    }

    /// All four responses in role order
    pub fn iter(&self) -> impl Iterator<Item = &ModelResponse> {
        StageRole::ALL.into_iter().map(move |role| self.get(role))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    pub cache_hits: u32,
    /// Requests issued to the inference service by this run, retries included
    pub api_calls: u32,
    /// Sorted, de-duplicated models whose output the result contains
    pub models_used: Vec<String>,
    pub degraded_roles: Vec<StageRole>,
    pub low_confidence_roles: Vec<StageRole>,
    pub deadline_exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub fingerprint: ProjectFingerprint,
    pub responses: StageResponses,
    pub metadata: RunMetadata,
}

impl PipelineResult {
    pub fn response(&self, role: StageRole) -> &ModelResponse {
        self.responses.get(role)
    }

    pub fn is_degraded(&self) -> bool {
        !self.metadata.degraded_roles.is_empty()
    }

    /// Headline score of the aggregate payload
    pub fn overall_score(&self) -> f64 {
        self.responses.aggregate.payload.score()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback(role: StageRole) -> ModelResponse {
        ModelResponse::fallback(
            role,
            "m",
            StagePayload::fallback(role),
            "service unavailable",
            None,
        )
    }

    fn result() -> PipelineResult {
        PipelineResult {
            fingerprint: ProjectFingerprint::new("shop-api", "abc123"),
            responses: StageResponses {
                architecture: fallback(StageRole::Architecture),
                deployment: fallback(StageRole::Deployment),
                business: fallback(StageRole::Business),
                aggregate: fallback(StageRole::Aggregate),
            },
            metadata: RunMetadata {
                started_at: Utc::now(),
                elapsed: Duration::from_millis(1500),
                cache_hits: 0,
                api_calls: 0,
                models_used: Vec::new(),
                degraded_roles: StageRole::ALL.to_vec(),
                low_confidence_roles: Vec::new(),
                deadline_exceeded: true,
            },
        }
    }

    #[test]
    fn test_fallback_response_is_degraded() {
        let response = fallback(StageRole::Business);
        assert!(response.degraded);
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.payload.role(), StageRole::Business);
    }

    #[test]
    fn test_responses_iterate_in_role_order() {
        let roles: Vec<StageRole> = result().responses.iter().map(|r| r.role).collect();
        assert_eq!(roles, StageRole::ALL.to_vec());
    }

    #[test]
    fn test_result_serializes_elapsed_in_millis() {
        let json: serde_json::Value =
            serde_json::from_str(&result().to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["metadata"]["elapsed_ms"], 1500);
        assert_eq!(json["metadata"]["degraded_roles"][0], "architecture");
        assert_eq!(json["responses"]["business"]["source"], "fallback");
        assert_eq!(json["responses"]["business"]["payload"]["role"], "business");
    }

    #[test]
    fn test_result_round_trips() {
        let original = result();
        let parsed: PipelineResult =
            serde_json::from_str(&original.to_json_pretty().unwrap()).unwrap();
        assert_eq!(parsed.metadata.elapsed, original.metadata.elapsed);
        assert!(parsed.is_degraded());
    }
}

use super::extract::{extract_structured_block, preview};
use super::ParseError;
use crate::assessment::{
    AggregateAssessment, ArchitectureAssessment, BusinessAssessment, DeploymentAssessment,
    FieldKind, FieldSpec, StagePayload, StageRole, MAX_SCORE, NEUTRAL_SCORE,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Typed payload plus the share of required fields the model supplied
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload {
    pub payload: StagePayload,
    /// Present-and-non-empty required fields over required fields, in [0, 1]
    pub confidence: f64,
    pub missing_fields: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ResponseValidator {
    confidence_threshold: f64,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl ResponseValidator {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn is_low_confidence(&self, confidence: f64) -> bool {
        confidence < self.confidence_threshold
    }

    /// Extracts and validates the payload for `role` from raw model text
    pub fn parse(&self, raw: &str, role: StageRole) -> Result<ValidatedPayload, ParseError> {
        let json = extract_structured_block(raw)?;
        let value: Value = serde_json::from_str(&json).map_err(|e| {
            warn!(role = %role, "JSON parse error: {}", e);
            ParseError::InvalidJson(format!("{}: {}", e, preview(&json)))
        })?;

        let object = match value {
            Value::Object(map) => unwrap_role_envelope(map, role),
            other => return Err(ParseError::NotAnObject(json_kind(&other))),
        };

        let fields = FieldReader::new(&object);
        let required = role.required_fields();
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|field| !fields.is_present(field))
            .map(|field| field.name)
            .collect();

        let present = required.len() - missing.len();
        if present == 0 {
            return Err(ParseError::NoRequiredFields(role));
        }

        let confidence = present as f64 / required.len() as f64;
        if !missing.is_empty() {
            debug!(role = %role, missing = ?missing, confidence, "Response is missing fields");
        }

        Ok(ValidatedPayload {
            payload: build_payload(role, &fields),
            confidence,
            missing_fields: missing,
        })
    }
}

/// Models sometimes nest the answer under the role name, e.g. `{"architecture": {...}}`
fn unwrap_role_envelope(map: Map<String, Value>, role: StageRole) -> Map<String, Value> {
    let has_fields = role
        .required_fields()
        .iter()
        .any(|field| map.contains_key(field.name));
    if has_fields || map.len() != 1 {
        return map;
    }
    match map.into_iter().next() {
        Some((key, Value::Object(inner))) => {
            debug!(role = %role, envelope = %key, "Unwrapping nested response object");
            inner
        }
        Some((key, value)) => Map::from_iter([(key, value)]),
        None => Map::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct FieldReader<'a> {
    object: &'a Map<String, Value>,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>) -> Self {
        Self { object }
    }

    fn is_present(&self, field: &FieldSpec) -> bool {
        match field.kind {
            FieldKind::Text => self.text(field.name).is_some(),
            FieldKind::List => self.list(field.name).is_some(),
            FieldKind::Score => self.score(field.name).is_some(),
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.object.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    /// Array of non-blank items; a lone string counts as a one-item list
    fn list(&self, name: &str) -> Option<Vec<String>> {
        let items: Vec<String> = match self.object.get(name)? {
            Value::Array(values) => values.iter().filter_map(list_item).collect(),
            Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => return None,
        };
        (!items.is_empty()).then_some(items)
    }

    fn score(&self, name: &str) -> Option<f64> {
        let raw = match self.object.get(name)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !raw.is_finite() {
            return None;
        }
        let clamped = raw.clamp(0.0, MAX_SCORE);
        if clamped != raw {
            warn!("Score {} for {} was out of range, clamped to {}", raw, name, clamped);
        }
        Some(clamped)
    }

    fn text_or_default(&self, name: &str) -> String {
        self.text(name).unwrap_or_default()
    }

    fn list_or_default(&self, name: &str) -> Vec<String> {
        self.list(name).unwrap_or_default()
    }

    fn score_or_neutral(&self, name: &str) -> f64 {
        self.score(name).unwrap_or(NEUTRAL_SCORE)
    }

    fn string_map(&self, name: &str) -> BTreeMap<String, String> {
        match self.object.get(name) {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) if !s.trim().is_empty() => {
                        Some((k.clone(), s.trim().to_string()))
                    }
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

fn list_item(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => ["title", "name", "description", "summary"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn build_payload(role: StageRole, fields: &FieldReader<'_>) -> StagePayload {
    match role {
        StageRole::Architecture => StagePayload::Architecture(ArchitectureAssessment {
            summary: fields.text_or_default("summary"),
            patterns: fields.list_or_default("patterns"),
            strengths: fields.list_or_default("strengths"),
            weaknesses: fields.list_or_default("weaknesses"),
            complexity_score: fields.score_or_neutral("complexity_score"),
            recommendations: fields.list_or_default("recommendations"),
        }),
        StageRole::Deployment => StagePayload::Deployment(DeploymentAssessment {
            summary: fields.text_or_default("summary"),
            readiness: fields.text_or_default("readiness"),
            platforms: fields.list_or_default("platforms"),
            risks: fields.list_or_default("risks"),
            readiness_score: fields.score_or_neutral("readiness_score"),
            recommendations: fields.list_or_default("recommendations"),
        }),
        StageRole::Business => StagePayload::Business(BusinessAssessment {
            summary: fields.text_or_default("summary"),
            target_users: fields.text_or_default("target_users"),
            value_proposition: fields.text_or_default("value_proposition"),
            monetization: fields.text_or_default("monetization"),
            risks: fields.list_or_default("risks"),
            viability_score: fields.score_or_neutral("viability_score"),
        }),
        StageRole::Aggregate => StagePayload::Aggregate(AggregateAssessment {
            executive_summary: fields.text_or_default("executive_summary"),
            overall_score: fields.score_or_neutral("overall_score"),
            key_risks: fields.list_or_default("key_risks"),
            priorities: fields.list_or_default("priorities"),
            facet_summaries: fields.string_map("facet_summaries"),
        }),
    }
}

//! Stage roles and their typed assessment payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Upper bound of every score field
pub const MAX_SCORE: f64 = 10.0;

/// Score used when a facet has no usable value
pub const NEUTRAL_SCORE: f64 = 5.0;
const MAX_SYNTHESIZED_ITEMS: usize = 5;

/// One of the four analysis roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    Architecture,
    Deployment,
    Business,
    /// Consumes the three independent payloads
    Aggregate,
}

impl StageRole {
    /// Roles that depend only on project facts
    pub const INDEPENDENT: [StageRole; 3] = [
        StageRole::Architecture,
        StageRole::Deployment,
        StageRole::Business,
    ];

    pub const ALL: [StageRole; 4] = [
        StageRole::Architecture,
        StageRole::Deployment,
        StageRole::Business,
        StageRole::Aggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Architecture => "architecture",
            StageRole::Deployment => "deployment",
            StageRole::Business => "business",
            StageRole::Aggregate => "aggregate",
        }
    }

    pub fn is_aggregator(&self) -> bool {
        matches!(self, StageRole::Aggregate)
    }

    /// Aggregator output depends on the current run and is never cached
    pub fn is_cacheable(&self) -> bool {
        !self.is_aggregator()
    }

    /// Fields the model response must provide for this role
    pub fn required_fields(&self) -> &'static [FieldSpec] {
        match self {
            StageRole::Architecture => ARCHITECTURE_FIELDS,
            StageRole::Deployment => DEPLOYMENT_FIELDS,
            StageRole::Business => BUSINESS_FIELDS,
            StageRole::Aggregate => AGGREGATE_FIELDS,
        }
    }
}

const ARCHITECTURE_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("summary"),
    FieldSpec::list("patterns"),
    FieldSpec::list("strengths"),
    FieldSpec::list("weaknesses"),
    FieldSpec::score("complexity_score"),
    FieldSpec::list("recommendations"),
];

const DEPLOYMENT_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("summary"),
    FieldSpec::text("readiness"),
    FieldSpec::list("platforms"),
    FieldSpec::list("risks"),
    FieldSpec::score("readiness_score"),
    FieldSpec::list("recommendations"),
];

const BUSINESS_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("summary"),
    FieldSpec::text("target_users"),
    FieldSpec::text("value_proposition"),
    FieldSpec::text("monetization"),
    FieldSpec::list("risks"),
    FieldSpec::score("viability_score"),
];

const AGGREGATE_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("executive_summary"),
    FieldSpec::score("overall_score"),
    FieldSpec::list("key_risks"),
    FieldSpec::list("priorities"),
];

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected JSON shape of a required field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-blank string
    Text,
    /// Non-empty array of strings
    List,
    /// Number (or numeric string) between 0 and 10
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
        }
    }

    pub const fn list(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::List,
        }
    }

    pub const fn score(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureAssessment {
    pub summary: String,
    pub patterns: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub complexity_score: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentAssessment {
    pub summary: String,
    pub readiness: String,
    pub platforms: Vec<String>,
    pub risks: Vec<String>,
    pub readiness_score: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessAssessment {
    pub summary: String,
    pub target_users: String,
    pub value_proposition: String,
    pub monetization: String,
    pub risks: Vec<String>,
    pub viability_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateAssessment {
    pub executive_summary: String,
    pub overall_score: f64,
    pub key_risks: Vec<String>,
    pub priorities: Vec<String>,
    /// Per-facet one-line summaries, keyed by role name
    #[serde(default)]
    pub facet_summaries: BTreeMap<String, String>,
}

/// Structured payload of one stage, one variant per role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum StagePayload {
    Architecture(ArchitectureAssessment),
    Deployment(DeploymentAssessment),
    Business(BusinessAssessment),
    Aggregate(AggregateAssessment),
}

impl StagePayload {
    pub fn role(&self) -> StageRole {
        match self {
            StagePayload::Architecture(_) => StageRole::Architecture,
            StagePayload::Deployment(_) => StageRole::Deployment,
            StagePayload::Business(_) => StageRole::Business,
            StagePayload::Aggregate(_) => StageRole::Aggregate,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            StagePayload::Architecture(a) => &a.summary,
            StagePayload::Deployment(d) => &d.summary,
            StagePayload::Business(b) => &b.summary,
            StagePayload::Aggregate(g) => &g.executive_summary,
        }
    }

    /// Headline score of the facet
    pub fn score(&self) -> f64 {
        match self {
            // Higher complexity is worse, so the facet score inverts it
            StagePayload::Architecture(a) => MAX_SCORE - a.complexity_score,
            StagePayload::Deployment(d) => d.readiness_score,
            StagePayload::Business(b) => b.viability_score,
            StagePayload::Aggregate(g) => g.overall_score,
        }
    }

    pub fn risks(&self) -> &[String] {
        match self {
            StagePayload::Architecture(a) => &a.weaknesses,
            StagePayload::Deployment(d) => &d.risks,
            StagePayload::Business(b) => &b.risks,
            StagePayload::Aggregate(g) => &g.key_risks,
        }
    }

    pub fn recommendations(&self) -> &[String] {
        match self {
            StagePayload::Architecture(a) => &a.recommendations,
            StagePayload::Deployment(d) => &d.recommendations,
            StagePayload::Business(_) => &[],
            StagePayload::Aggregate(g) => &g.priorities,
        }
    }

    /// Deterministic safe default used when a stage cannot produce a model answer
    ///
    /// The aggregate fallback built here has no facet input; the orchestrator
    /// uses [`AggregateAssessment::synthesize`] when facet payloads exist.
    pub fn fallback(role: StageRole) -> Self {
        let unavailable = |facet: &str| {
            format!(
                "{} assessment unavailable; heuristic defaults were used instead of model output.",
                facet
            )
        };

        match role {
            StageRole::Architecture => StagePayload::Architecture(ArchitectureAssessment {
                summary: unavailable("Architecture"),
                patterns: Vec::new(),
                strengths: Vec::new(),
                weaknesses: Vec::new(),
                complexity_score: NEUTRAL_SCORE,
                recommendations: vec!["Re-run the architecture analysis when the inference service is available".to_string()],
            }),
            StageRole::Deployment => StagePayload::Deployment(DeploymentAssessment {
                summary: unavailable("Deployment"),
                readiness: "unknown".to_string(),
                platforms: Vec::new(),
                risks: Vec::new(),
                readiness_score: NEUTRAL_SCORE,
                recommendations: vec!["Re-run the deployment analysis when the inference service is available".to_string()],
            }),
            StageRole::Business => StagePayload::Business(BusinessAssessment {
                summary: unavailable("Business"),
                target_users: "unknown".to_string(),
                value_proposition: "unknown".to_string(),
                monetization: "unknown".to_string(),
                risks: Vec::new(),
                viability_score: NEUTRAL_SCORE,
            }),
            StageRole::Aggregate => StagePayload::Aggregate(AggregateAssessment::unavailable()),
        }
    }
}

/// Facet input to the aggregate stage
#[derive(Debug, Clone, Copy)]
pub struct FacetInput<'a> {
    pub payload: &'a StagePayload,
    pub degraded: bool,
}

impl AggregateAssessment {
    fn unavailable() -> Self {
        Self {
            executive_summary: "Aggregate assessment unavailable; heuristic defaults were used instead of model output.".to_string(),
            overall_score: NEUTRAL_SCORE,
            key_risks: Vec::new(),
            priorities: Vec::new(),
            facet_summaries: BTreeMap::new(),
        }
    }

    /// Builds a degraded aggregate from the facet payloads without a model
    ///
    /// The overall score is the mean of the non-degraded facet scores, or of
    /// all facet scores when every facet is degraded.
    pub fn synthesize(facets: &[FacetInput<'_>]) -> Self {
        if facets.is_empty() {
            return Self::unavailable();
        }

        let healthy: Vec<&FacetInput<'_>> = facets.iter().filter(|f| !f.degraded).collect();
        let scored: Vec<&FacetInput<'_>> = if healthy.is_empty() {
            facets.iter().collect()
        } else {
            healthy
        };
        let overall_score =
            scored.iter().map(|f| f.payload.score()).sum::<f64>() / scored.len() as f64;

        let mut key_risks = Vec::new();
        let mut priorities = Vec::new();
        let mut facet_summaries = BTreeMap::new();
        for facet in facets {
            for risk in facet.payload.risks() {
                if key_risks.len() < MAX_SYNTHESIZED_ITEMS && !key_risks.contains(risk) {
                    key_risks.push(risk.clone());
                }
            }
            if let Some(first) = facet.payload.recommendations().first() {
                if priorities.len() < MAX_SYNTHESIZED_ITEMS && !priorities.contains(first) {
                    priorities.push(first.clone());
                }
            }
            let label = if facet.degraded { " (degraded)" } else { "" };
            facet_summaries.insert(
                facet.payload.role().as_str().to_string(),
                format!("{}{}", facet.payload.summary(), label),
            );
        }

        let degraded_count = facets.iter().filter(|f| f.degraded).count();
        let executive_summary = format!(
            "Aggregate synthesized from {} facet assessment(s) without model output ({} degraded). Overall score {:.1}/10.",
            facets.len(),
            degraded_count,
            overall_score
        );

        Self {
            executive_summary,
            overall_score: overall_score.clamp(0.0, MAX_SCORE),
            key_risks,
            priorities,
            facet_summaries,
        }
    }
}

//! Prompt templates for the stage roles
//!
//! Templates are external to the orchestrator: anything implementing
//! [`PromptBuilder`] can be plugged in. [`DefaultPrompts`] renders the
//! project facts and the role's JSON shape in plain text.

use crate::assessment::{FacetInput, FieldKind, StageRole};
use crate::facts::ProjectFacts;

pub trait PromptBuilder: Send + Sync {
    /// Prompt for one of the independent roles
    fn independent(&self, role: StageRole, facts: &ProjectFacts) -> String;

    /// Prompt for the aggregator, given the resolved facet payloads
    fn aggregate(&self, facts: &ProjectFacts, facets: &[FacetInput<'_>]) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

impl DefaultPrompts {
    pub fn new() -> Self {
        Self
    }
}

impl PromptBuilder for DefaultPrompts {
    fn independent(&self, role: StageRole, facts: &ProjectFacts) -> String {
        let task = match role {
            StageRole::Architecture => {
                "Assess the software architecture of this project: structure, patterns, strengths, weaknesses and complexity."
            }
            StageRole::Deployment => {
                "Assess the deployment readiness of this project: packaging, CI, infrastructure and operational risks."
            }
            StageRole::Business => {
                "Assess the business potential of this project: who it serves, what value it offers and how it could make money."
            }
            StageRole::Aggregate => "Combine the facet assessments into an overall verdict.",
        };

        format!(
            r#"{}

{}

Respond with a single JSON object:
{}

Rules:
- Scores are numbers from 0 to 10
- Lists contain short plain-text items
- Do not add commentary outside the JSON
"#,
            task,
            render_facts(facts),
            response_shape(role)
        )
    }

    fn aggregate(&self, facts: &ProjectFacts, facets: &[FacetInput<'_>]) -> String {
        let mut sections = Vec::with_capacity(facets.len());
        for facet in facets {
            let role = facet.payload.role();
            let label = if facet.degraded {
                " [DEGRADED: heuristic default, model output unavailable]"
            } else {
                ""
            };
            let body = serde_json::to_string_pretty(facet.payload)
                .unwrap_or_else(|_| facet.payload.summary().to_string());
            sections.push(format!("## {}{}\n{}", role, label, body));
        }

        format!(
            r#"Combine the following facet assessments of project "{}" into an executive verdict.
Weigh degraded facets lightly; they carry no model insight.

{}

Respond with a single JSON object:
{}

Rules:
- overall_score is a number from 0 to 10
- facet_summaries maps each facet name to one sentence
- Do not add commentary outside the JSON
"#,
            facts.project,
            sections.join("\n\n"),
            response_shape(StageRole::Aggregate)
        )
    }
}

fn response_shape(role: StageRole) -> String {
    let mut lines: Vec<String> = role
        .required_fields()
        .iter()
        .map(|field| {
            let hint = match field.kind {
                FieldKind::Text => "\"...\"",
                FieldKind::List => "[\"...\"]",
                FieldKind::Score => "0-10",
            };
            format!("  \"{}\": {}", field.name, hint)
        })
        .collect();
    if role.is_aggregator() {
        lines.push("  \"facet_summaries\": {\"architecture\": \"...\", \"deployment\": \"...\", \"business\": \"...\"}".to_string());
    }
    format!("{{\n{}\n}}", lines.join(",\n"))
}

fn render_facts(facts: &ProjectFacts) -> String {
    let code = &facts.code;
    let languages = if code.languages.is_empty() {
        "unknown".to_string()
    } else {
        code.languages
            .iter()
            .map(|(lang, lines)| format!("{} ({} lines)", lang, lines))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let deployment = &facts.deployment;
    let docs = &facts.documentation;

    format!(
        r#"Project: {}

Code:
- Files: {}, lines: {}
- Languages: {}
- Average complexity: {:.1}, max: {}
- Test file ratio: {:.2}

Deployment:
- Artifacts: {}
- CI: {}
- Infrastructure as code: {}
- Environment files: {}

Documentation:
- README: {}
- Docs files: {}
- API docs: {}
- License: {}"#,
        facts.project,
        code.total_files,
        code.total_lines,
        languages,
        code.average_complexity,
        code.max_complexity,
        code.test_file_ratio,
        list_or_none(&deployment.artifacts),
        list_or_none(&deployment.ci_providers),
        list_or_none(&deployment.infrastructure_as_code),
        list_or_none(&deployment.env_files),
        if docs.readme_present {
            format!("yes ({} words)", docs.readme_words)
        } else {
            "no".to_string()
        },
        list_or_none(&docs.docs_files),
        if docs.has_api_docs { "yes" } else { "no" },
        docs.license.as_deref().unwrap_or("none"),
    )
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

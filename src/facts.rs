//! Project facts consumed by the assessment pipeline
//!
//! Facts are produced by external static analyzers (code metrics, deployment
//! artifact detection, documentation parsing). The pipeline only reads them:
//! they feed the stage prompts and the fingerprint used for cache invalidation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A source file considered relevant for the assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the project root
    pub path: String,
    /// Content digest reported by the scanner (any stable hash)
    pub digest: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
        }
    }
}

/// Code-quality metrics from AST analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeMetrics {
    pub total_files: u64,
    pub total_lines: u64,
    /// Lines of code per language
    pub languages: BTreeMap<String, u64>,
    pub average_complexity: f64,
    pub max_complexity: u64,
    /// Share of test files among all source files (0.0 - 1.0)
    pub test_file_ratio: f64,
}

/// Deployment artifacts found in the project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentFacts {
    /// Container and orchestration files (Dockerfile, compose, k8s manifests)
    pub artifacts: Vec<String>,
    pub ci_providers: Vec<String>,
    pub infrastructure_as_code: Vec<String>,
    pub env_files: Vec<String>,
}

/// Documentation metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentationFacts {
    pub readme_present: bool,
    pub readme_words: u64,
    pub docs_files: Vec<String>,
    pub has_api_docs: bool,
    pub license: Option<String>,
}

/// Structured facts about a project, produced upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFacts {
    /// Stable project identity (name or root path)
    pub project: String,
    #[serde(default)]
    pub source_files: Vec<SourceFile>,
    #[serde(default)]
    pub code: CodeMetrics,
    #[serde(default)]
    pub deployment: DeploymentFacts,
    #[serde(default)]
    pub documentation: DocumentationFacts,
}

impl ProjectFacts {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    pub fn with_source_files(mut self, files: Vec<SourceFile>) -> Self {
        self.source_files = files;
        self
    }

    /// Loads facts from a JSON file written by the analyzers
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project facts: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse project facts: {}", path.display()))
    }

    /// Computes the fingerprint of the analyzed project state
    pub fn fingerprint(&self) -> ProjectFingerprint {
        let mut files: Vec<&SourceFile> = self.source_files.iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.digest.cmp(&b.digest)));

        let mut hasher = Sha256::new();
        for file in files {
            hasher.update(file.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(file.digest.as_bytes());
            hasher.update([b'\n']);
        }

        ProjectFingerprint {
            project: self.project.clone(),
            source_hash: hex::encode(hasher.finalize()),
        }
    }
}

/// Identifies which state of which project is being analyzed
///
/// The cache is addressed by `project`; `source_hash` is stored alongside each
/// entry and compared on lookup so edits to the project invalidate old results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectFingerprint {
    pub project: String,
    pub source_hash: String,
}

impl ProjectFingerprint {
    pub fn new(project: impl Into<String>, source_hash: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            source_hash: source_hash.into(),
        }
    }

    /// Short form of the source hash for log lines
    pub fn short_hash(&self) -> &str {
        let end = self
            .source_hash
            .char_indices()
            .nth(12)
            .map_or(self.source_hash.len(), |(i, _)| i);
        &self.source_hash[..end]
    }
}

impl fmt::Display for ProjectFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.short_hash())
    }
}

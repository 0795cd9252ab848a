//! Core data types shared across discovery, signal extraction and the
//! generation pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A Python source file inside the target project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the project root
    pub rel_path: PathBuf,
    /// Dotted import path, e.g. `pkg.sub.module`
    pub module_path: Option<String>,
}

/// A function or method discovered in the target project.
///
/// Read-only to the pipeline once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFunction {
    pub name: String,
    /// Fully-qualified path: `pkg.mod.func` or `pkg.mod.Class.method`
    pub qualified_name: String,
    pub file: SourceFile,
    /// 1-based first line
    pub line: usize,
    /// 1-based last line
    pub end_line: usize,
    pub source: String,
    pub is_method: bool,
    pub class_name: Option<String>,
}

/// Behavioral facts extracted for one target function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub invariants: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SignalSet {
    pub fn has_properties(&self) -> bool {
        [
            &self.invariants,
            &self.preconditions,
            &self.postconditions,
            &self.relationships,
        ]
        .iter()
        .any(|list| list.iter().any(|s| !s.trim().is_empty()))
    }

    /// JSON view handed to prompts (metadata is omitted on purpose: it holds raw model output).
    pub fn prompt_json(&self) -> String {
        let view = serde_json::json!({
            "description": self.description,
            "invariants": self.invariants,
            "preconditions": self.preconditions,
            "postconditions": self.postconditions,
            "relationships": self.relationships,
            "examples": self.examples,
        });
        serde_json::to_string_pretty(&view).unwrap_or_default()
    }
}

/// Where a property came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Invariant,
    Precondition,
    Postcondition,
    Relationship,
    Description,
}

impl PropertyKind {
    pub fn label(&self) -> &'static str {
        match self {
            PropertyKind::Invariant => "invariant",
            PropertyKind::Precondition => "precondition",
            PropertyKind::Postcondition => "postcondition",
            PropertyKind::Relationship => "relationship",
            PropertyKind::Description => "description",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One testable claim about a target function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub kind: PropertyKind,
    pub description: String,
}

impl Property {
    pub fn new(kind: PropertyKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Short label for log lines
    pub fn preview(&self) -> String {
        let mut preview: String = self.description.chars().take(50).collect();
        if self.description.chars().count() > 50 {
            preview.push_str("...");
        }
        preview
    }
}

/// One generated test for one property, with its check/execution history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub property: Property,
    pub code: String,
    pub static_check_report: String,
    pub executed: bool,
    pub passed: bool,
    pub diagnostic: String,
    /// Set when triage judged a failure to be a real defect of the target
    #[serde(default)]
    pub confirmed_defect: bool,
}

impl Candidate {
    pub fn new(property: Property, code: impl Into<String>) -> Self {
        Self {
            property,
            code: code.into(),
            static_check_report: String::new(),
            executed: false,
            passed: false,
            diagnostic: String::new(),
            confirmed_defect: false,
        }
    }

    /// Replace the code after a repair; execution state is reset.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self.executed = false;
        self.passed = false;
        self.diagnostic.clear();
        self
    }
}

/// The merged, persisted test module for one target function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub target_function: String,
    pub artifact_path: PathBuf,
    pub merged_code: String,
    pub static_check_report: String,
    pub passed_summary: PassedSummary,
    /// Surviving candidates, in property order
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// Counts of how each property ended up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassedSummary {
    pub properties: usize,
    pub passed: usize,
    pub confirmed_defects: usize,
    pub discarded: usize,
    pub skipped: usize,
}

impl PassedSummary {
    /// True when every kept candidate passed and none documents a defect
    pub fn all_passed(&self) -> bool {
        self.confirmed_defects == 0 && self.passed > 0
    }
}

impl fmt::Display for PassedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} properties: {} passed, {} confirmed defects, {} discarded, {} skipped",
            self.properties, self.passed, self.confirmed_defects, self.discarded, self.skipped
        )
    }
}

/// One line of the shared result log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub target_function: String,
    pub artifact_path: PathBuf,
    pub merged_code: String,
    pub static_report: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PassedSummary>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl ResultRecord {
    pub fn for_artifact(artifact: &GeneratedArtifact) -> Self {
        Self {
            target_function: artifact.target_function.clone(),
            artifact_path: artifact.artifact_path.clone(),
            merged_code: artifact.merged_code.clone(),
            static_report: artifact.static_check_report.clone(),
            passed: artifact.passed_summary.all_passed(),
            property: None,
            summary: Some(artifact.passed_summary),
            recorded_at: chrono::Utc::now(),
        }
    }

    pub fn for_candidate(artifact: &GeneratedArtifact, candidate: &Candidate) -> Self {
        Self {
            target_function: artifact.target_function.clone(),
            artifact_path: artifact.artifact_path.clone(),
            merged_code: candidate.code.clone(),
            static_report: candidate.static_check_report.clone(),
            passed: candidate.passed,
            property: Some(candidate.property.clone()),
            summary: None,
            recorded_at: chrono::Utc::now(),
        }
    }
}

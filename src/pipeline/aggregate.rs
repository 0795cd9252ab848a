use crate::model::{Candidate, GeneratedArtifact, PassedSummary, TargetFunction};
use crate::sandbox::Sandbox;
use anyhow::Context;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const NO_TESTS_PLACEHOLDER: &str = "# No tests generated";
pub const NO_TEST_FUNCTIONS_PLACEHOLDER: &str = "# No test functions generated";

/// Import lines and remaining body of one candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSource {
    pub imports: Vec<String>,
    pub body: String,
}

/// Drop a trailing `# ...` comment from one import line.
fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim()
}

fn is_import_line(trimmed: &str) -> bool {
    trimmed.starts_with("import ") || (trimmed.starts_with("from ") && trimmed.contains(" import "))
}

/// Separate import statements from everything else.
///
/// Imports are hoisted trimmed; a parenthesized import spanning several
/// lines is folded into a single line.
pub fn split_imports(code: &str) -> SplitSource {
    let mut imports = Vec::new();
    let mut body = Vec::new();
    let mut pending: Option<String> = None;

    for line in code.lines() {
        let trimmed = line.trim();

        if let Some(mut open) = pending.take() {
            let code = strip_comment(trimmed);
            open.push(' ');
            open.push_str(code);
            if code.contains(')') {
                imports.push(fold_parenthesized(&open));
            } else {
                pending = Some(open);
            }
            continue;
        }

        if is_import_line(trimmed) {
            let code = strip_comment(trimmed);
            if code.contains('(') && !code.contains(')') {
                pending = Some(code.to_string());
            } else {
                imports.push(trimmed.to_string());
            }
        } else {
            body.push(line);
        }
    }

    if let Some(open) = pending {
        imports.push(open);
    }

    SplitSource {
        imports,
        body: body.join("\n").trim().to_string(),
    }
}

fn fold_parenthesized(import: &str) -> String {
    let Some((head, rest)) = import.split_once('(') else {
        return import.to_string();
    };
    let inner = rest.split(')').next().unwrap_or_default();
    let names: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    format!("{} {}", head.trim(), names.join(", "))
}

/// Render a test module: sorted unique imports, a blank line, bodies
/// separated by blank lines. Placeholders stand in for missing parts.
pub fn render_module(imports: &BTreeSet<String>, bodies: &[String]) -> String {
    let imports: Vec<&str> = imports.iter().map(String::as_str).collect();
    match (imports.is_empty(), bodies.is_empty()) {
        (false, false) => format!("{}\n\n{}\n", imports.join("\n"), bodies.join("\n\n")),
        (true, false) => format!("{}\n", bodies.join("\n\n")),
        (false, true) => format!("{}\n\n{}\n", imports.join("\n"), NO_TEST_FUNCTIONS_PLACEHOLDER),
        (true, true) => format!("{}\n", NO_TESTS_PLACEHOLDER),
    }
}

/// Normalized source for a single candidate, or None when nothing but
/// imports is left.
pub fn normalize_candidate_source(code: &str) -> Option<String> {
    let split = split_imports(code);
    if split.body.is_empty() {
        return None;
    }
    let imports: BTreeSet<String> = split.imports.into_iter().collect();
    Some(render_module(&imports, &[split.body]))
}

/// Merge surviving candidates, in the given order, into one module.
pub fn merge_candidates<'a>(codes: impl IntoIterator<Item = &'a str>) -> String {
    let mut imports = BTreeSet::new();
    let mut bodies = Vec::new();
    for code in codes {
        let split = split_imports(code);
        imports.extend(split.imports);
        if !split.body.is_empty() {
            bodies.push(split.body);
        }
    }
    render_module(&imports, &bodies)
}

pub fn artifact_file_name(index: usize) -> String {
    format!("test_pbt_{}.py", index)
}

/// Writes the per-target artifact and runs the final static check.
pub struct Aggregator {
    output_dir: PathBuf,
}

impl Aggregator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn write_artifact(
        &self,
        index: usize,
        target: &TargetFunction,
        candidates: Vec<Candidate>,
        summary: PassedSummary,
        sandbox: &Sandbox,
    ) -> anyhow::Result<GeneratedArtifact> {
        let merged_code = merge_candidates(candidates.iter().map(|c| c.code.as_str()));

        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        ensure_package_marker(&self.output_dir)?;

        let artifact_path = self.output_dir.join(artifact_file_name(index));
        fs::write(&artifact_path, &merged_code)
            .with_context(|| format!("Failed to write {}", artifact_path.display()))?;

        let static_check_report = sandbox.static_check(&artifact_path).await;

        tracing::info!(
            artifact = %artifact_path.display(),
            kept = candidates.len(),
            "wrote test module"
        );

        Ok(GeneratedArtifact {
            target_function: target.qualified_name.clone(),
            artifact_path,
            merged_code,
            static_check_report,
            passed_summary: summary,
            candidates,
        })
    }
}

/// Empty `__init__.py` so the output directory imports as a package
pub fn ensure_package_marker(dir: &Path) -> anyhow::Result<()> {
    let marker = dir.join("__init__.py");
    if !marker.exists() {
        fs::write(&marker, "")
            .with_context(|| format!("Failed to write {}", marker.display()))?;
    }
    Ok(())
}

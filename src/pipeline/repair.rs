//! Repair policies applied to a candidate between generation and
//! aggregation.
//!
//! Two policies exist. `StaticRepair` loops on static-checker errors before
//! the first execution and discards anything that then fails to run.
//! `ExecutionTriage` skips static repair, and when execution fails asks the
//! model whether the failure is a real defect; if not, it gets exactly one
//! fix and one re-run.

use super::scratch::ScratchFile;
use crate::config::RepairMode;
use crate::llm::client::truncate_str;
use crate::llm::{extract_code, parse_json, prompts, CompletionClient, Parsed};
use crate::model::{Candidate, TargetFunction};
use crate::sandbox::{has_static_errors, Sandbox};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type RepairFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

pub const DEFAULT_MAX_STATIC_ATTEMPTS: u32 = 3;

/// Everything a policy may touch while repairing one candidate
pub struct RepairContext<'a> {
    pub target: &'a TargetFunction,
    pub llm: &'a dyn CompletionClient,
    pub sandbox: &'a Sandbox,
    pub scratch: &'a ScratchFile,
}

pub trait RepairPolicy: Send + Sync {
    fn mode(&self) -> RepairMode;

    /// Runs once before the first execution.
    fn before_execution<'a>(
        &'a self,
        _ctx: &'a RepairContext<'a>,
        candidate: Candidate,
    ) -> RepairFuture<'a, Candidate> {
        Box::pin(async move { Ok(candidate) })
    }

    /// Called after a failed execution with the runner's diagnostic.
    /// `Some` keeps the candidate (passing or documenting a confirmed
    /// defect), `None` discards it.
    fn attempt<'a>(
        &'a self,
        ctx: &'a RepairContext<'a>,
        candidate: Candidate,
        diagnostic: &'a str,
    ) -> RepairFuture<'a, Option<Candidate>>;
}

pub fn policy_for(mode: RepairMode, max_static_attempts: u32) -> Arc<dyn RepairPolicy> {
    match mode {
        RepairMode::Static => Arc::new(StaticRepair::new(max_static_attempts)),
        RepairMode::Triage => Arc::new(ExecutionTriage),
    }
}

/// Check, fix, re-check until clean or out of attempts.
pub struct StaticRepair {
    max_attempts: u32,
}

impl StaticRepair {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for StaticRepair {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATIC_ATTEMPTS)
    }
}

impl RepairPolicy for StaticRepair {
    fn mode(&self) -> RepairMode {
        RepairMode::Static
    }

    fn before_execution<'a>(
        &'a self,
        ctx: &'a RepairContext<'a>,
        candidate: Candidate,
    ) -> RepairFuture<'a, Candidate> {
        Box::pin(async move {
            let mut candidate = candidate;
            for attempt in 1..=self.max_attempts {
                if !ctx.scratch.write(&candidate.code)? {
                    break;
                }
                let report = ctx.sandbox.static_check(ctx.scratch.path()).await;
                let blocking = has_static_errors(&report);
                candidate.static_check_report = report;
                if !blocking {
                    tracing::debug!(attempt, "static check clean");
                    break;
                }
                if attempt == self.max_attempts {
                    tracing::warn!(
                        property = %candidate.property.preview(),
                        attempts = self.max_attempts,
                        "static errors remain, executing anyway"
                    );
                    break;
                }

                let prompt = prompts::fix_static_errors(
                    ctx.target,
                    &candidate.property,
                    &candidate.code,
                    &candidate.static_check_report,
                );
                let fixed = extract_code(&ctx.llm.complete(&prompt).await?);
                if fixed.trim().is_empty() {
                    tracing::warn!(attempt, "static fix came back empty");
                    break;
                }
                let report = std::mem::take(&mut candidate.static_check_report);
                candidate = candidate.with_code(fixed);
                candidate.static_check_report = report;
            }
            Ok(candidate)
        })
    }

    fn attempt<'a>(
        &'a self,
        _ctx: &'a RepairContext<'a>,
        candidate: Candidate,
        diagnostic: &'a str,
    ) -> RepairFuture<'a, Option<Candidate>> {
        Box::pin(async move {
            tracing::info!(
                property = %candidate.property.preview(),
                diagnostic = %truncate_str(diagnostic, 200),
                "execution failed after static repair, discarding"
            );
            Ok(None)
        })
    }
}

/// The judge's answer about a failing test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageVerdict {
    #[serde(default)]
    pub is_function_bug: bool,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub property_validity: String,
    #[serde(default)]
    pub test_correctness: String,
}

/// Anything that does not parse is treated as "not a defect"
pub fn parse_verdict(response: &str) -> TriageVerdict {
    match parse_json::<TriageVerdict>(response) {
        Parsed::Parsed(verdict) => verdict,
        Parsed::Unparsed { error, .. } => {
            tracing::warn!(%error, "unparseable triage verdict, assuming test error");
            TriageVerdict {
                reasoning: format!("Failed to parse verdict: {}", error),
                ..Default::default()
            }
        }
    }
}

/// Judge a failure, then keep, fix once, or discard.
pub struct ExecutionTriage;

impl RepairPolicy for ExecutionTriage {
    fn mode(&self) -> RepairMode {
        RepairMode::Triage
    }

    fn attempt<'a>(
        &'a self,
        ctx: &'a RepairContext<'a>,
        candidate: Candidate,
        diagnostic: &'a str,
    ) -> RepairFuture<'a, Option<Candidate>> {
        Box::pin(async move {
            let mut candidate = candidate;
            let prompt =
                prompts::judge_failure(ctx.target, &candidate.property, &candidate.code, diagnostic);
            let verdict = parse_verdict(&ctx.llm.complete(&prompt).await?);

            if verdict.is_function_bug {
                tracing::info!(
                    property = %candidate.property.preview(),
                    confidence = %verdict.confidence,
                    "failure confirmed as function defect"
                );
                candidate.confirmed_defect = true;
                return Ok(Some(candidate));
            }

            let prompt = prompts::fix_test(ctx.target, &candidate.property, &candidate.code, diagnostic);
            let fixed = extract_code(&ctx.llm.complete(&prompt).await?);
            if fixed.trim().is_empty() {
                tracing::info!(property = %candidate.property.preview(), "empty test fix, discarding");
                return Ok(None);
            }

            let mut fixed = candidate.with_code(fixed);
            if !ctx.scratch.write(&fixed.code)? {
                return Ok(None);
            }
            let outcome = ctx.sandbox.execute(ctx.scratch.path()).await;
            fixed.executed = true;
            fixed.passed = outcome.passed;
            fixed.diagnostic = outcome.diagnostic;

            if fixed.passed {
                tracing::info!(property = %fixed.property.preview(), "fixed test passes");
                Ok(Some(fixed))
            } else {
                tracing::info!(property = %fixed.property.preview(), "fixed test still fails, discarding");
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Property, PropertyKind, SourceFile};
    use crate::sandbox::{RunOutcome, StaticChecker, TestRunner};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl CompletionClient for Scripted {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(async move {
                *self.calls.lock().unwrap() += 1;
                Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
            })
        }
    }

    struct Reports(Mutex<Vec<String>>, Mutex<usize>);

    impl Reports {
        fn new(reports: &[&str]) -> Self {
            Self(
                Mutex::new(reports.iter().rev().map(|s| s.to_string()).collect()),
                Mutex::new(0),
            )
        }
    }

    impl StaticChecker for Reports {
        fn check(&self, _path: &Path) -> String {
            *self.1.lock().unwrap() += 1;
            self.0.lock().unwrap().pop().unwrap_or_default()
        }
    }

    struct Outcomes(Mutex<Vec<RunOutcome>>);

    impl TestRunner for Outcomes {
        fn run(&self, _path: &Path) -> RunOutcome {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| RunOutcome::failed("no scripted outcome"))
        }
    }

    /// Passes every run and counts how many happened
    #[derive(Default)]
    struct CountingRunner(Mutex<usize>);

    impl TestRunner for CountingRunner {
        fn run(&self, _path: &Path) -> RunOutcome {
            *self.0.lock().unwrap() += 1;
            RunOutcome::passed()
        }
    }

    fn target() -> TargetFunction {
        TargetFunction {
            name: "upper".to_string(),
            qualified_name: "strs.upper".to_string(),
            file: SourceFile {
                path: PathBuf::from("/tmp/strs.py"),
                rel_path: PathBuf::from("strs.py"),
                module_path: Some("strs".to_string()),
            },
            line: 1,
            end_line: 2,
            source: "def upper(s):\n    return s.upper()".to_string(),
            is_method: false,
            class_name: None,
        }
    }

    fn failing_candidate() -> Candidate {
        let mut candidate = Candidate::new(
            Property::new(PropertyKind::Postcondition, "upper(s) == s.upper()"),
            "import strs\ndef test_post(): assert False",
        );
        candidate.executed = true;
        candidate.diagnostic = "AssertionError".to_string();
        candidate
    }

    const E_REPORT: &str = "t.py:1:0: E0602: Undefined variable 'st'";

    #[tokio::test]
    async fn test_static_repair_stops_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let checker = Arc::new(Reports::new(&[E_REPORT, ""]));
        let sandbox = Sandbox::new(checker.clone(), Arc::new(Outcomes(Mutex::new(Vec::new()))));
        let llm = Scripted::new(&["```python\nimport strs\ndef test_fixed(): pass\n```"]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let candidate = Candidate::new(
            Property::new(PropertyKind::Invariant, "len"),
            "def test_broken(): st.text()",
        );
        let repaired = StaticRepair::default()
            .before_execution(&ctx, candidate)
            .await
            .unwrap();
        assert_eq!(repaired.code, "import strs\ndef test_fixed(): pass");
        assert_eq!(repaired.static_check_report, "");
        assert_eq!(*checker.1.lock().unwrap(), 2);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_static_repair_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let checker = Arc::new(Reports::new(&[E_REPORT, E_REPORT, E_REPORT, E_REPORT]));
        let sandbox = Sandbox::new(checker.clone(), Arc::new(Outcomes(Mutex::new(Vec::new()))));
        let llm = Scripted::new(&["def test_a(): st", "def test_b(): st", "def test_c(): st"]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let candidate = Candidate::new(Property::new(PropertyKind::Invariant, "len"), "def t(): st");
        let repaired = StaticRepair::new(3).before_execution(&ctx, candidate).await.unwrap();
        assert_eq!(*checker.1.lock().unwrap(), 3);
        assert_eq!(llm.calls(), 2);
        assert!(has_static_errors(&repaired.static_check_report));
    }

    #[tokio::test]
    async fn test_static_repair_blank_fix_keeps_last_code() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let checker = Arc::new(Reports::new(&[E_REPORT, E_REPORT, E_REPORT]));
        let runner = Arc::new(CountingRunner::default());
        let sandbox = Sandbox::new(checker.clone(), runner.clone());
        let llm = Scripted::new(&["   \n"]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let candidate = Candidate::new(
            Property::new(PropertyKind::Invariant, "len"),
            "def test_broken(): st.text()",
        );
        let repaired = StaticRepair::new(3).before_execution(&ctx, candidate).await.unwrap();
        assert_eq!(repaired.code, "def test_broken(): st.text()");
        assert_eq!(repaired.static_check_report, E_REPORT);
        assert_eq!(*checker.1.lock().unwrap(), 1);
        assert_eq!(llm.calls(), 1);

        // The kept code is still executable afterwards
        assert!(scratch.write(&repaired.code).unwrap());
        assert!(sandbox.execute(scratch.path()).await.passed);
        assert_eq!(*runner.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_triage_confirmed_defect_is_kept_without_fix() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let sandbox = Sandbox::new(
            Arc::new(Reports::new(&[])),
            Arc::new(Outcomes(Mutex::new(Vec::new()))),
        );
        let llm = Scripted::new(&[r#"{"is_function_bug": true, "confidence": "high"}"#]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let kept = ExecutionTriage
            .attempt(&ctx, failing_candidate(), "AssertionError")
            .await
            .unwrap()
            .unwrap();
        assert!(kept.confirmed_defect);
        assert!(!kept.passed);
        assert_eq!(kept.diagnostic, "AssertionError");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_triage_fix_that_passes_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let sandbox = Sandbox::new(
            Arc::new(Reports::new(&[])),
            Arc::new(Outcomes(Mutex::new(vec![RunOutcome::passed()]))),
        );
        let llm = Scripted::new(&[
            r#"{"is_function_bug": false}"#,
            "```python\nimport strs\ndef test_post(): assert True\n```",
        ]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let kept = ExecutionTriage
            .attempt(&ctx, failing_candidate(), "AssertionError")
            .await
            .unwrap()
            .unwrap();
        assert!(kept.passed);
        assert!(!kept.confirmed_defect);
        assert!(kept.code.contains("assert True"));
    }

    #[tokio::test]
    async fn test_triage_unparseable_verdict_fix_fails_discards() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let sandbox = Sandbox::new(
            Arc::new(Reports::new(&[])),
            Arc::new(Outcomes(Mutex::new(vec![RunOutcome::failed("still broken")]))),
        );
        let llm = Scripted::new(&["I think it's a bug!", "def test_post(): assert 1 == 2"]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let result = ExecutionTriage.attempt(&ctx, failing_candidate(), "AssertionError").await.unwrap();
        assert!(result.is_none());
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_triage_blank_fix_discards_without_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), 0, 0);
        let runner = Arc::new(CountingRunner::default());
        let sandbox = Sandbox::new(Arc::new(Reports::new(&[])), runner.clone());
        let llm = Scripted::new(&[r#"{"is_function_bug": false}"#, "  \n"]);
        let target = target();
        let ctx = RepairContext {
            target: &target,
            llm: &llm,
            sandbox: &sandbox,
            scratch: &scratch,
        };

        let result = ExecutionTriage.attempt(&ctx, failing_candidate(), "AssertionError").await.unwrap();
        assert!(result.is_none());
        assert_eq!(llm.calls(), 2);
        assert_eq!(*runner.0.lock().unwrap(), 0);
        assert!(!scratch.path().exists());
    }

    #[test]
    fn test_verdict_parsing_is_conservative() {
        assert!(!parse_verdict("not json").is_function_bug);
        assert!(!parse_verdict(r#"{"is_function_bug": "yes"}"#).is_function_bug);
        let verdict = parse_verdict(
            "```json\n{\"is_function_bug\": true, \"evidence\": [\"upper('ß') != 'SS'\"]}\n```",
        );
        assert!(verdict.is_function_bug);
        assert_eq!(verdict.evidence.len(), 1);
    }

    #[test]
    fn test_policy_for_mode() {
        assert_eq!(policy_for(RepairMode::Static, 3).mode(), RepairMode::Static);
        assert_eq!(policy_for(RepairMode::Triage, 3).mode(), RepairMode::Triage);
    }
}

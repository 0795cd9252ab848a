//! Execution sandbox: static checking and isolated test execution through
//! external tools.
//!
//! Both tools are blocking from the caller's point of view, so every call is
//! moved onto tokio's blocking pool to keep sibling pipelines running.

pub mod checker;
pub mod command;
pub mod runner;

pub use checker::{has_static_errors, CommandChecker, StaticChecker};
pub use runner::{PytestRunner, RunOutcome, TestRunner};

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct Sandbox {
    checker: Arc<dyn StaticChecker>,
    runner: Arc<dyn TestRunner>,
}

impl Sandbox {
    pub fn new(checker: Arc<dyn StaticChecker>, runner: Arc<dyn TestRunner>) -> Self {
        Self { checker, runner }
    }

    /// Static report for a file on disk
    pub async fn static_check(&self, path: &Path) -> String {
        let checker = self.checker.clone();
        let path: PathBuf = path.to_path_buf();
        match tokio::task::spawn_blocking(move || checker.check(&path)).await {
            Ok(report) => report,
            Err(err) => format!("static check unavailable: {}", err),
        }
    }

    /// Execute a test file; a crashed or cancelled run counts as a failure
    pub async fn execute(&self, path: &Path) -> RunOutcome {
        let runner = self.runner.clone();
        let path: PathBuf = path.to_path_buf();
        match tokio::task::spawn_blocking(move || runner.run(&path)).await {
            Ok(outcome) => outcome,
            Err(err) => RunOutcome::failed(format!("Error running test: {}", err)),
        }
    }
}

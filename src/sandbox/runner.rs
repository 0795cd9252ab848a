use super::command::{run_command, CommandSpec, LaunchError};
use crate::config::ToolsConfig;
use std::path::{Path, PathBuf};

/// Result of executing one test file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub passed: bool,
    pub diagnostic: String,
}

impl RunOutcome {
    pub fn passed() -> Self {
        Self {
            passed: true,
            diagnostic: String::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Executes a test file in isolation. Launch problems are failed runs, not
/// errors.
pub trait TestRunner: Send + Sync {
    fn run(&self, path: &Path) -> RunOutcome;
}

/// `python -m pytest <file>` from the project root
pub struct PytestRunner {
    python: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout_secs: u64,
}

impl PytestRunner {
    pub fn from_config(tools: &ToolsConfig, project_dir: &Path) -> Self {
        Self {
            python: tools.python.clone(),
            args: tools.runner_args.clone(),
            cwd: project_dir.to_path_buf(),
            timeout_secs: tools.runner_timeout_secs,
        }
    }
}

impl TestRunner for PytestRunner {
    fn run(&self, path: &Path) -> RunOutcome {
        // Test file goes right after `-m pytest` so trailing flags still apply
        let mut args = self.args.clone();
        let insert_at = args
            .iter()
            .position(|a| a == "pytest")
            .map(|i| i + 1)
            .unwrap_or(args.len());
        args.insert(insert_at, path.to_string_lossy().to_string());

        let spec = CommandSpec::new(&self.cwd, &self.python)
            .args(&args)
            .timeout_secs(self.timeout_secs);

        match run_command(&spec) {
            Ok(outcome) if outcome.success() => RunOutcome::passed(),
            Ok(outcome) => RunOutcome::failed(outcome.combined_output()),
            Err(LaunchError::NotFound(program)) => {
                RunOutcome::failed(format!("Python executable not found: {}", program))
            }
            Err(LaunchError::Other(message)) => {
                RunOutcome::failed(format!("Error running test: {}", message))
            }
        }
    }
}

use super::command::{run_command, CommandSpec, LaunchError};
use crate::config::ToolsConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Static analysis over a single file. Advisory only: a missing tool yields
/// a textual marker, never an error.
pub trait StaticChecker: Send + Sync {
    fn check(&self, path: &Path) -> String;
}

fn error_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bE\d{4}\b").expect("static regex"))
}

/// True when a report contains an error-class diagnostic that must be
/// repaired before execution. Warnings and conventions do not count.
pub fn has_static_errors(report: &str) -> bool {
    if error_code_re().is_match(report) {
        return true;
    }
    let lower = report.to_lowercase();
    lower.contains("syntax error") || lower.contains("syntax-error")
}

/// Runs an external checker (pylint by default) restricted to errors
pub struct CommandChecker {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout_secs: u64,
}

impl CommandChecker {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            timeout_secs: 120,
        }
    }

    pub fn from_config(tools: &ToolsConfig, project_dir: &Path) -> Self {
        Self {
            program: tools.checker_program.clone(),
            args: tools.checker_args.clone(),
            cwd: project_dir.to_path_buf(),
            timeout_secs: tools.checker_timeout_secs,
        }
    }
}

impl StaticChecker for CommandChecker {
    fn check(&self, path: &Path) -> String {
        let spec = CommandSpec::new(&self.cwd, &self.program)
            .args(&self.args)
            .arg(path.to_string_lossy())
            .timeout_secs(self.timeout_secs);

        match run_command(&spec) {
            Ok(outcome) => outcome.combined_output(),
            Err(LaunchError::NotFound(program)) => format!(
                "{} not found in PATH. Install it to enable static checks.",
                program
            ),
            Err(LaunchError::Other(message)) => format!("static check unavailable: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_block() {
        let report = "t.py:3:0: E0602: Undefined variable 'st' (undefined-variable)";
        assert!(has_static_errors(report));
    }

    #[test]
    fn test_syntax_error_literal_blocks() {
        assert!(has_static_errors("Parsing failed: syntax error near line 2"));
        assert!(has_static_errors("t.py:1:0: Parsing failed (syntax-error)"));
    }

    #[test]
    fn test_warnings_are_informational() {
        let report = "t.py:1:0: W0611: Unused import os (unused-import)\nt.py:2:0: C0114: Missing docstring";
        assert!(!has_static_errors(report));
        assert!(!has_static_errors(""));
    }

    #[test]
    fn test_missing_checker_degrades_to_marker() {
        let checker = CommandChecker::new("no-such-checker-pbtgen", Vec::new(), ".");
        let report = checker.check(Path::new("x.py"));
        assert!(report.contains("not found in PATH"));
        assert!(!has_static_errors(&report));
    }
}

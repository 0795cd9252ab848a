//! Configuration management for pbtgen
//!
//! Settings are read from `pbtgen.toml` in the project directory (or an
//! explicit path). Every field has a default so a missing or partial file
//! is fine; CLI flags override whatever the file says.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "pbtgen.toml";

const KEYRING_SERVICE: &str = "pbtgen";
const KEYRING_USERNAME: &str = "llm_api_key";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub pbt: PbtConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Any OpenAI-compatible chat completions endpoint
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4.1".to_string(),
            temperature: 0.1,
            max_tokens: 3000,
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Which repair flow a pipeline runs. Only one is active per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMode {
    /// Fix static-checker errors before the first execution
    Static,
    /// Judge execution failures and attempt one fix
    #[default]
    Triage,
}

impl std::str::FromStr for RepairMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(RepairMode::Static),
            "triage" => Ok(RepairMode::Triage),
            other => Err(format!("unknown repair mode '{}' (expected static|triage)", other)),
        }
    }
}

/// What the scheduler appends to the result log for each finished target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogGranularity {
    /// One line per finished artifact
    #[default]
    Artifact,
    /// One line per surviving candidate
    Candidate,
}

impl std::str::FromStr for LogGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "artifact" => Ok(LogGranularity::Artifact),
            "candidate" => Ok(LogGranularity::Candidate),
            other => Err(format!(
                "unknown log granularity '{}' (expected artifact|candidate)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PbtConfig {
    pub top_n_related_files: usize,
    pub max_source_snippet_chars: usize,
    /// Deepest level shown in the project tree handed to file selection
    pub max_file_tree_depth: usize,
    pub max_file_tree_entries: usize,
    pub max_static_repair_attempts: u32,
    pub repair_mode: RepairMode,
    pub log_granularity: LogGranularity,
    /// Upper bound on target functions processed at once
    pub max_in_flight: usize,
    pub result_log_file: String,
}

impl Default for PbtConfig {
    fn default() -> Self {
        Self {
            top_n_related_files: 10,
            max_source_snippet_chars: 8000,
            max_file_tree_depth: 20,
            max_file_tree_entries: 5000,
            max_static_repair_attempts: 3,
            repair_mode: RepairMode::default(),
            log_granularity: LogGranularity::default(),
            max_in_flight: 4,
            result_log_file: "results.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Python interpreter used to launch the test runner
    pub python: String,
    pub checker_program: String,
    pub checker_args: Vec<String>,
    pub checker_timeout_secs: u64,
    pub runner_args: Vec<String>,
    pub runner_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            checker_program: "pylint".to_string(),
            checker_args: vec!["--disable=all".to_string(), "--enable=E".to_string()],
            checker_timeout_secs: 120,
            runner_args: vec![
                "-m".to_string(),
                "pytest".to_string(),
                "-v".to_string(),
                "--tb=short".to_string(),
            ],
            runner_timeout_secs: 300,
        }
    }
}

impl Config {
    /// Load config from `path`, or return defaults if the file does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config '{}'", path.display()))
    }

    /// Load `pbtgen.toml` from the project directory, if present.
    pub fn load_for_project(project_dir: &Path) -> anyhow::Result<Self> {
        Self::load_from(&project_dir.join(CONFIG_FILE_NAME))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn result_log_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.pbt.result_log_file)
    }

    /// Get the LLM API key (environment first, then system keychain)
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(&self.llm.api_key_env) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(
                    "Failed to read API key from system keychain: {}. Set {} instead.",
                    err,
                    self.llm.api_key_env
                );
                None
            }
        }
    }
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.pbt.max_static_repair_attempts, 3);
        assert_eq!(config.pbt.repair_mode, RepairMode::Triage);
        assert_eq!(config.tools.checker_program, "pylint");
        assert_eq!(config.pbt.max_file_tree_depth, 20);
        assert_eq!(config.pbt.max_file_tree_entries, 5000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [pbt]
            repair_mode = "static"
            max_in_flight = 8

            [llm]
            model = "local/test"
            "#,
        )
        .unwrap();
        assert_eq!(config.pbt.repair_mode, RepairMode::Static);
        assert_eq!(config.pbt.max_in_flight, 8);
        assert_eq!(config.pbt.top_n_related_files, 10);
        assert_eq!(config.llm.model, "local/test");
        assert_eq!(config.llm.max_tokens, 3000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_for_project(dir.path()).unwrap();
        assert_eq!(config.pbt.result_log_file, "results.jsonl");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[pbt\nrepair_mode = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("STATIC".parse::<RepairMode>().unwrap(), RepairMode::Static);
        assert!("both".parse::<RepairMode>().is_err());
        assert_eq!(
            "candidate".parse::<LogGranularity>().unwrap(),
            LogGranularity::Candidate
        );
    }
}

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const OUTPUT_TAIL_MAX_CHARS: usize = 8_000;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(cwd: impl AsRef<Path>, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args.extend(args.iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
            .trim()
            .to_string()
    }
}

/// Why a command could not produce an exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The executable does not exist on this host
    NotFound(String),
    Other(String),
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::NotFound(program) => write!(f, "{} not found in PATH", program),
            LaunchError::Other(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// stdout and stderr joined, each trimmed to its tail
    pub fn combined_output(&self) -> String {
        let mut combined = format!(
            "{}\n{}",
            tail_chars(&self.stdout, OUTPUT_TAIL_MAX_CHARS),
            tail_chars(&self.stderr, OUTPUT_TAIL_MAX_CHARS)
        );
        if self.timed_out {
            combined.push_str("\n[timed out]");
        }
        combined
    }
}

/// Run a command to completion (or timeout), capturing both streams.
///
/// Blocking: async callers must run this on a blocking thread.
pub fn run_command(spec: &CommandSpec) -> Result<CommandOutcome, LaunchError> {
    let mut command = Command::new(&spec.program);
    command
        .current_dir(&spec.cwd)
        .args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LaunchError::NotFound(spec.program.clone())
        } else {
            LaunchError::Other(format!("Failed to start {}: {}", spec.label(), e))
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LaunchError::Other("Failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| LaunchError::Other("Failed to capture stderr".to_string()))?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = BufReader::new(stdout).read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = BufReader::new(stderr).read_to_end(&mut buf);
        buf
    });

    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= spec.timeout {
                    timed_out = true;
                    let _ = child.kill();
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(LaunchError::Other(format!(
                    "Failed to wait for {}: {}",
                    spec.label(),
                    e
                )))
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutcome {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

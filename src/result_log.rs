//! Append-only JSONL result log shared by every concurrent pipeline.
//!
//! One record per line. Appends are serialized in-process by a mutex and
//! across processes by an advisory file lock, so batches never interleave.

use crate::model::ResultRecord;
use anyhow::Context;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const LOG_LOCK_TIMEOUT_SECS: u64 = 30;
const LOG_LOCK_RETRY_MS: u64 = 25;

/// Shared sink for finished results. Safe to call from many tasks at once.
///
/// Calls may block while another writer holds the log.
pub trait AppendOnlyLog: Send + Sync {
    /// Append a batch as consecutive lines; no other writer's lines land
    /// in between.
    fn append_all(&self, records: &[ResultRecord]) -> anyhow::Result<()>;

    fn append(&self, record: &ResultRecord) -> anyhow::Result<()> {
        self.append_all(std::slice::from_ref(record))
    }
}

pub struct JsonlResultLog {
    path: PathBuf,
    file: Mutex<File>,
}

struct LogLock<'a> {
    file: &'a File,
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

impl JsonlResultLog {
    /// Open (creating if needed) the log for appending
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open result log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(file: &File) -> anyhow::Result<LogLock<'_>> {
        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(file) {
                Ok(()) => return Ok(LogLock { file }),
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOG_LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for result log lock ({}s)",
                            LOG_LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOG_LOCK_RETRY_MS));
                }
            }
        }
    }
}

impl AppendOnlyLog for JsonlResultLog {
    fn append_all(&self, records: &[ResultRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut batch = String::new();
        for record in records {
            batch.push_str(&serde_json::to_string(record)?);
            batch.push('\n');
        }

        let guard = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("result log mutex poisoned"))?;
        let mut file: &File = &guard;
        let _lock = Self::lock(file)?;
        // One write per batch keeps the lines whole and adjacent
        file.write_all(batch.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush()?;
        Ok(())
    }
}

/// Read every well-formed record; malformed lines are skipped.
pub fn read_records(path: &Path) -> anyhow::Result<Vec<ResultRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("Failed to read {}", path.display())),
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<ResultRecord>(line) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed result line");
                None
            }
        })
        .collect())
}

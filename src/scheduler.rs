//! Runs one pipeline per target function under a global in-flight ceiling.
//!
//! A failing or panicking target is logged and counted; it never takes down
//! its siblings. Only setup (output directory, result log) is fatal.

use crate::config::{LogGranularity, PbtConfig};
use crate::model::{GeneratedArtifact, ResultRecord, TargetFunction};
use crate::pipeline::aggregate::ensure_package_marker;
use crate::pipeline::Pipeline;
use crate::result_log::{AppendOnlyLog, JsonlResultLog};
use crate::signals::SignalSource;
use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;

/// What a whole run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_appended: usize,
    pub artifacts: Vec<PathBuf>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} targets: {} succeeded, {} failed, {} records appended",
            self.targets, self.succeeded, self.failed, self.records_appended
        )
    }
}

/// Create the output directory and open the shared result log.
pub fn prepare_output(output_dir: &Path, pbt: &PbtConfig) -> anyhow::Result<JsonlResultLog> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    ensure_package_marker(output_dir)?;
    JsonlResultLog::open(output_dir.join(&pbt.result_log_file))
}

/// Records to append for one finished artifact
pub fn records_for(artifact: &GeneratedArtifact, granularity: LogGranularity) -> Vec<ResultRecord> {
    match granularity {
        LogGranularity::Artifact => vec![ResultRecord::for_artifact(artifact)],
        LogGranularity::Candidate if artifact.candidates.is_empty() => {
            vec![ResultRecord::for_artifact(artifact)]
        }
        LogGranularity::Candidate => artifact
            .candidates
            .iter()
            .map(|c| ResultRecord::for_candidate(artifact, c))
            .collect(),
    }
}

struct TargetReport {
    artifact: PathBuf,
    appended: usize,
}

pub struct Scheduler {
    signals: Arc<dyn SignalSource>,
    pipeline: Pipeline,
    log: Arc<dyn AppendOnlyLog>,
    granularity: LogGranularity,
    max_in_flight: usize,
}

impl Scheduler {
    pub fn new(
        signals: Arc<dyn SignalSource>,
        pipeline: Pipeline,
        log: Arc<dyn AppendOnlyLog>,
        granularity: LogGranularity,
        max_in_flight: usize,
    ) -> Self {
        Self {
            signals,
            pipeline,
            log,
            granularity,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Process every target; returns once all of them have finished.
    ///
    /// Each task runs inside the pipeline's per-target span.
    pub async fn run(&self, targets: Vec<TargetFunction>) -> RunSummary {
        let run_span = self.pipeline.span().clone();
        let mut summary = RunSummary {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return summary;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut handles = Vec::with_capacity(targets.len());

        for (index, target) in targets.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let span = self.pipeline.target_span(index, &target);
            let signals = self.signals.clone();
            let pipeline = self.pipeline.clone();
            let log = self.log.clone();
            let granularity = self.granularity;
            let name = target.qualified_name.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    process_target(index, &target, signals.as_ref(), &pipeline, log, granularity)
                        .await
                }
                .instrument(span),
            );
            handles.push((name, handle));
        }

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => {
                    summary.succeeded += 1;
                    summary.records_appended += report.appended;
                    summary.artifacts.push(report.artifact);
                }
                Ok(Err(err)) => {
                    summary.failed += 1;
                    tracing::error!(parent: &run_span, function = %name, error = %format!("{:#}", err), "target failed");
                }
                Err(join_err) => {
                    summary.failed += 1;
                    tracing::error!(parent: &run_span, function = %name, error = %join_err, "target task panicked");
                }
            }
        }

        tracing::info!(parent: &run_span, %summary, "run finished");
        summary
    }
}

async fn process_target(
    index: usize,
    target: &TargetFunction,
    signals: &dyn SignalSource,
    pipeline: &Pipeline,
    log: Arc<dyn AppendOnlyLog>,
    granularity: LogGranularity,
) -> anyhow::Result<TargetReport> {
    let target_signals = signals
        .signals_for(target)
        .await
        .context("signal extraction failed")?;
    let artifact = pipeline
        .run_in_current_span(index, target, &target_signals)
        .await?;

    let appended = append_records(log, records_for(&artifact, granularity)).await?;
    tracing::info!(records = appended, summary = %artifact.passed_summary, "results logged");

    Ok(TargetReport {
        artifact: artifact.artifact_path,
        appended,
    })
}

/// Append one target's records as a single batch on the blocking pool,
/// since the log may wait on a file lock.
pub async fn append_records(
    log: Arc<dyn AppendOnlyLog>,
    records: Vec<ResultRecord>,
) -> anyhow::Result<usize> {
    let count = records.len();
    tokio::task::spawn_blocking(move || log.append_all(&records))
        .await
        .context("result log append did not complete")??;
    Ok(count)
}

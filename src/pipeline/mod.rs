//! Per-target generation pipeline: derive properties, generate one candidate
//! per property, check and execute it, repair according to the configured
//! policy, then merge the survivors into one test module.

pub mod aggregate;
pub mod generator;
pub mod properties;
pub mod repair;
pub mod scratch;

pub use aggregate::{merge_candidates, Aggregator};
pub use generator::CandidateGenerator;
pub use properties::derive_properties;
pub use repair::{policy_for, ExecutionTriage, RepairContext, RepairPolicy, StaticRepair, TriageVerdict};

use crate::llm::CompletionClient;
use crate::model::{Candidate, GeneratedArtifact, PassedSummary, Property, TargetFunction};
use crate::sandbox::Sandbox;
use crate::signals::TargetSignals;
use scratch::ScratchFile;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, Span};

/// How one property ended up
enum PropertyOutcome {
    Kept(Candidate),
    Discarded,
    Skipped,
}

#[derive(Clone)]
pub struct Pipeline {
    llm: Arc<dyn CompletionClient>,
    generator: CandidateGenerator,
    sandbox: Sandbox,
    repair: Arc<dyn RepairPolicy>,
    output_dir: PathBuf,
    /// Parent of every per-target span
    span: Span,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        sandbox: Sandbox,
        repair: Arc<dyn RepairPolicy>,
        output_dir: impl Into<PathBuf>,
        span: Span,
    ) -> Self {
        Self {
            generator: CandidateGenerator::new(llm.clone()),
            llm,
            sandbox,
            repair,
            output_dir: output_dir.into(),
            span,
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Span covering all work for one target, child of the pipeline span
    pub fn target_span(&self, index: usize, target: &TargetFunction) -> Span {
        tracing::info_span!(
            parent: &self.span,
            "pbt_target",
            index,
            function = %target.qualified_name,
            mode = ?self.repair.mode()
        )
    }

    /// Run the whole pipeline for one target inside its own span.
    ///
    /// `index` is the target's position in the run and keys every file the
    /// pipeline writes. A completion failure aborts this target only.
    pub async fn run(
        &self,
        index: usize,
        target: &TargetFunction,
        signals: &TargetSignals,
    ) -> anyhow::Result<GeneratedArtifact> {
        let span = self.target_span(index, target);
        self.run_in_current_span(index, target, signals)
            .instrument(span)
            .await
    }

    /// Same as [`Pipeline::run`] for callers that already entered the
    /// target span.
    pub async fn run_in_current_span(
        &self,
        index: usize,
        target: &TargetFunction,
        signals: &TargetSignals,
    ) -> anyhow::Result<GeneratedArtifact> {
        let properties = derive_properties(&signals.from_files, signals.from_retrieval.as_ref());
        tracing::info!(count = properties.len(), "derived properties");

        let mut summary = PassedSummary {
            properties: properties.len(),
            ..Default::default()
        };
        let mut survivors = Vec::new();

        for (prop_idx, property) in properties.iter().enumerate() {
            let scratch = ScratchFile::new(&self.output_dir, index, prop_idx);
            let outcome = self.process_property(target, signals, property, &scratch).await;
            scratch.remove();

            match outcome? {
                PropertyOutcome::Kept(candidate) => {
                    if candidate.confirmed_defect {
                        summary.confirmed_defects += 1;
                    } else {
                        summary.passed += 1;
                    }
                    survivors.push(candidate);
                }
                PropertyOutcome::Discarded => summary.discarded += 1,
                PropertyOutcome::Skipped => summary.skipped += 1,
            }
        }

        tracing::info!(%summary, "properties processed");

        Aggregator::new(&self.output_dir)
            .write_artifact(index, target, survivors, summary, &self.sandbox)
            .await
    }

    async fn process_property(
        &self,
        target: &TargetFunction,
        signals: &TargetSignals,
        property: &Property,
        scratch: &ScratchFile,
    ) -> anyhow::Result<PropertyOutcome> {
        tracing::debug!(kind = %property.kind, property = %property.preview(), "generating");

        let Some(candidate) = self.generator.generate(target, signals, property).await? else {
            return Ok(PropertyOutcome::Skipped);
        };

        let ctx = RepairContext {
            target,
            llm: self.llm.as_ref(),
            sandbox: &self.sandbox,
            scratch,
        };

        let mut candidate = self.repair.before_execution(&ctx, candidate).await?;

        if !scratch.write(&candidate.code)? {
            tracing::warn!(property = %property.preview(), "candidate has no test body");
            return Ok(PropertyOutcome::Skipped);
        }

        let run = self.sandbox.execute(scratch.path()).await;
        candidate.executed = true;
        candidate.passed = run.passed;
        candidate.diagnostic = run.diagnostic;

        if candidate.passed {
            tracing::info!(property = %property.preview(), "test passed");
            return Ok(PropertyOutcome::Kept(candidate));
        }

        tracing::info!(property = %property.preview(), "test failed, repairing");
        let diagnostic = candidate.diagnostic.clone();
        Ok(match self.repair.attempt(&ctx, candidate, &diagnostic).await? {
            Some(kept) => PropertyOutcome::Kept(kept),
            None => PropertyOutcome::Discarded,
        })
    }
}

//! End-to-end documentation pipeline: model → six stages → merged report.
//!
//! 1. Classification (sequential; its domain and stakeholders feed every later stage)
//! 2. Glossary, architecture and measure analysis (concurrent, settle-all)
//! 3. Synthesis (sequential, sees all earlier outputs), then coercion
//! 4. Polish (sequential, fixed counts handed over verbatim)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use modeldoc_ingest::{IntegrityReport, LoadedModel, check};
use modeldoc_llm::TextGenerator;
use modeldoc_shared::{
    CURRENT_SCHEMA_VERSION, ModelData, ModelDocError, PipelineSettings, ReportMetadata, Result, RunId, StageId,
    StageSummary,
};

use crate::coerce::{apply_polish, coerce};
use crate::context::PipelineContext;
use crate::report::{ConfidenceBlock, FinalReport};
use crate::stages::{
    Admission, ArchitectureStage, ClassificationStage, GlossaryStage, MeasureAnalysisStage,
    PolishStage, StageExecutor, StageResult, StageState, SynthesisStage,
};

/// Everything a run starts from.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub model: ModelData,
    pub integrity: IntegrityReport,
    /// SHA-256 over the input files, when read from disk.
    pub fingerprint: Option<String>,
    pub skipped_rows: usize,
}

impl PipelineInput {
    /// Input from an in-memory model; integrity is checked here.
    pub fn from_model(model: ModelData) -> Self {
        let integrity = check(&model);
        Self {
            model,
            integrity,
            fingerprint: None,
            skipped_rows: 0,
        }
    }
}

impl From<LoadedModel> for PipelineInput {
    fn from(loaded: LoadedModel) -> Self {
        Self {
            skipped_rows: loaded.stats.total_skipped(),
            fingerprint: Some(loaded.fingerprint),
            ..Self::from_model(loaded.model)
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineOutput {
    pub report: FinalReport,
    pub metadata: ReportMetadata,
    /// Stage results in execution order.
    pub stages: Vec<StageResult>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Callback trait for reporting pipeline progress to the UI.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a stage settles, successfully or on its fallback.
    fn stage_finished(&self, summary: &StageSummary);
    /// Called when the pipeline completes.
    fn done(&self, output: &PipelineOutput);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_finished(&self, _summary: &StageSummary) {}
    fn done(&self, _output: &PipelineOutput) {}
}

// ---------------------------------------------------------------------------
// Stage bookkeeping
// ---------------------------------------------------------------------------

struct StageTracker {
    states: BTreeMap<StageId, StageState>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            states: StageId::ALL.into_iter().map(|s| (s, StageState::NotStarted)).collect(),
        }
    }

    fn advance(&mut self, stage: StageId, next: StageState) {
        let current = self.states.get(&stage).copied().unwrap_or(StageState::NotStarted);
        if current.can_advance_to(next) {
            self.states.insert(stage, next);
        } else {
            warn!(stage = %stage, from = ?current, to = ?next, "ignoring invalid stage transition");
        }
    }

    fn settle(&mut self, result: &StageResult) {
        self.advance(result.stage, result.state());
    }

    /// Mark every settled stage merged; returns the stages that never settled.
    fn merge_all(&mut self) -> Vec<StageId> {
        for stage in StageId::ALL {
            self.advance(stage, StageState::Merged);
        }
        self.states
            .iter()
            .filter(|(_, state)| **state != StageState::Merged)
            .map(|(stage, _)| *stage)
            .collect()
    }
}

/// Weighted mean of stage confidences.
pub fn overall_confidence(results: &[StageResult]) -> f64 {
    let (sum, weight) = results.iter().fold((0.0, 0.0), |(sum, weight), r| {
        let w = r.stage.confidence_weight();
        (sum + r.confidence * w, weight + w)
    });
    if weight > 0.0 { sum / weight } else { 0.0 }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full documentation pipeline.
///
/// Only a required stage failing in strict mode (or a serialization bug)
/// returns an error; service outages degrade to fallbacks.
#[instrument(skip_all, fields(measures = input.model.measures.len(), tables = input.model.tables.len()))]
pub async fn run_pipeline(
    input: PipelineInput,
    generator: Arc<dyn TextGenerator>,
    settings: &PipelineSettings,
    progress: &dyn ProgressReporter,
) -> Result<PipelineOutput> {
    let start = Instant::now();
    let run_id = RunId::new();
    let counts = input.model.counts();
    info!(%run_id, model = generator.model_id(), "starting documentation pipeline");

    let executor = Arc::new(StageExecutor::new(generator, settings));
    let mut tracker = StageTracker::new();
    let ctx = PipelineContext::new(input.model, input.integrity, settings.business_context.clone());

    // --- Stage 1: classification ---
    progress.phase("Classifying business domain");
    tracker.advance(StageId::Classification, StageState::Requested);
    let classification = executor
        .execute(&ClassificationStage, &ctx, Admission::Direct)
        .await?;
    tracker.settle(&classification);
    progress.stage_finished(&classification.summary());

    let (domain, stakeholders) = ClassificationStage::resolve(&classification.payload, &ctx);
    info!(%domain, stakeholders = stakeholders.len(), "domain classified");
    let mut ctx = ctx
        .with_classification(domain, stakeholders)
        .with_output(StageId::Classification, classification.payload.clone());

    // --- Stages 2-4: fan-out ---
    progress.phase("Analyzing glossary, architecture and measures");
    for stage in [StageId::Glossary, StageId::Architecture, StageId::MeasureAnalysis] {
        tracker.advance(stage, StageState::Requested);
    }
    let parallel = fan_out(&executor, &ctx).await;
    for result in &parallel {
        tracker.settle(result);
        progress.stage_finished(&result.summary());
        ctx = ctx.with_output(result.stage, result.payload.clone());
    }

    // --- Stage 5: synthesis + coercion ---
    progress.phase("Synthesizing report");
    tracker.advance(StageId::Synthesis, StageState::Requested);
    let synthesis = executor.execute(&SynthesisStage, &ctx, Admission::Direct).await?;
    tracker.settle(&synthesis);
    progress.stage_finished(&synthesis.summary());

    let mut report = coerce(&synthesis.payload, &ctx);
    debug!(measures = report.measures.len(), "report coerced");
    let merged = serde_json::to_value(&report).map_err(|e| {
        ModelDocError::stage(StageId::Synthesis.as_str(), format!("report serialization failed: {e}"))
    })?;
    let ctx = ctx.with_output(StageId::Synthesis, merged);

    // --- Stage 6: polish ---
    progress.phase("Polishing summary");
    tracker.advance(StageId::Polish, StageState::Requested);
    let polish = executor.execute(&PolishStage, &ctx, Admission::Direct).await?;
    tracker.settle(&polish);
    progress.stage_finished(&polish.summary());
    apply_polish(&mut report, &polish.payload);

    // --- Merge ---
    let mut stages = vec![classification];
    stages.extend(parallel);
    stages.push(synthesis);
    stages.push(polish);
    for stage in tracker.merge_all() {
        warn!(%stage, "stage never settled before merge");
    }

    let overall = round3(overall_confidence(&stages));
    report.confidence = ConfidenceBlock {
        overall,
        stages: stages
            .iter()
            .map(|r| (r.stage.as_str().to_string(), round3(r.confidence)))
            .collect(),
    };

    let metadata = ReportMetadata {
        schema_version: CURRENT_SCHEMA_VERSION,
        run_id,
        generated_at: Utc::now(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        model: executor.model_id().to_string(),
        counts,
        domain: report.overview.domain.clone(),
        input_fingerprint: input.fingerprint,
        skipped_rows: input.skipped_rows,
        confidence: overall,
        stages: stages.iter().map(StageResult::summary).collect(),
        artifacts: Vec::new(),
    };

    let output = PipelineOutput {
        report,
        metadata,
        stages,
        elapsed: start.elapsed(),
    };

    info!(
        confidence = overall,
        fallbacks = output.stages.iter().filter(|s| s.used_fallback).count(),
        elapsed_ms = output.elapsed.as_millis() as u64,
        "pipeline complete"
    );
    progress.done(&output);
    Ok(output)
}

/// Run glossary, architecture and measure analysis concurrently. Each
/// settles to its own result or fallback; none can cancel another.
async fn fan_out(executor: &Arc<StageExecutor>, ctx: &PipelineContext) -> [StageResult; 3] {
    let glossary = {
        let (executor, ctx) = (Arc::clone(executor), ctx.clone());
        tokio::spawn(async move { executor.execute(&GlossaryStage, &ctx, Admission::Limited).await })
    };
    let architecture = {
        let (executor, ctx) = (Arc::clone(executor), ctx.clone());
        tokio::spawn(async move { executor.execute(&ArchitectureStage, &ctx, Admission::Limited).await })
    };
    let measures = {
        let (executor, ctx) = (Arc::clone(executor), ctx.clone());
        tokio::spawn(async move { MeasureAnalysisStage.run(&executor, &ctx, Admission::Limited).await })
    };

    let (glossary, architecture, measures) = tokio::join!(glossary, architecture, measures);
    [
        settle(StageId::Glossary, glossary, || executor.fallback(&GlossaryStage, ctx, 0, 0)),
        settle(StageId::Architecture, architecture, || {
            executor.fallback(&ArchitectureStage, ctx, 0, 0)
        }),
        settle(StageId::MeasureAnalysis, measures, || {
            MeasureAnalysisStage::fallback(executor, ctx)
        }),
    ]
}

fn settle(
    stage: StageId,
    joined: std::result::Result<Result<StageResult>, JoinError>,
    fallback: impl FnOnce() -> StageResult,
) -> StageResult {
    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(stage = %stage, error = %err, "parallel stage failed, using fallback");
            fallback()
        }
        Err(err) => {
            warn!(stage = %stage, error = %err, "parallel stage task aborted, using fallback");
            fallback()
        }
    }
}

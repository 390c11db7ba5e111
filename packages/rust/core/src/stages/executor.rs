//! Generic stage execution: call, retry, parse, clamp, fall back.
//!
//! Every stage goes through the same path:
//! `NotStarted → Requested → {Succeeded | FallbackUsed} → Merged`.
//! Service failures and unusable responses end in `FallbackUsed`; neither is
//! an error unless strict mode is on and the stage is required.

use std::sync::Arc;
use std::time::{Duration, Instant};

use modeldoc_llm::{
    GenerateError, GenerateOptions, Generation, RetryPolicy, TextGenerator, UsageStats, with_retry,
};
use modeldoc_shared::{ConfidenceCeilings, ModelDocError, PipelineSettings, Result, StageId, StageSummary};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::context::PipelineContext;
use crate::json::number_field;
use crate::parse::parse_tolerant;
use crate::stages::Stage;

// ---------------------------------------------------------------------------
// State and result
// ---------------------------------------------------------------------------

/// Lifecycle of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotStarted,
    Requested,
    Succeeded,
    FallbackUsed,
    Merged,
}

impl StageState {
    pub fn can_advance_to(self, next: StageState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Requested)
                | (Self::Requested, Self::Succeeded | Self::FallbackUsed)
                | (Self::Succeeded | Self::FallbackUsed, Self::Merged)
        )
    }
}

/// The immutable outcome of one stage.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: StageId,
    pub payload: Value,
    pub confidence: f64,
    pub raw_text: String,
    pub used_fallback: bool,
    pub attempts: u32,
    pub usage: UsageStats,
    pub latency_ms: u64,
}

impl StageResult {
    pub fn state(&self) -> StageState {
        if self.used_fallback {
            StageState::FallbackUsed
        } else {
            StageState::Succeeded
        }
    }

    /// A result produced without calling the service at all.
    pub fn without_call(stage: StageId, payload: Value, confidence: f64) -> Self {
        Self {
            stage,
            payload,
            confidence,
            raw_text: String::new(),
            used_fallback: false,
            attempts: 0,
            usage: UsageStats::default(),
            latency_ms: 0,
        }
    }

    pub fn summary(&self) -> StageSummary {
        StageSummary {
            stage: self.stage,
            confidence: self.confidence,
            used_fallback: self.used_fallback,
            attempts: self.attempts,
            latency_ms: self.latency_ms,
            tokens_in: self.usage.tokens_in,
            tokens_out: self.usage.tokens_out,
        }
    }
}

/// Whether a call must take a slot from the fan-out limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Direct,
    Limited,
}

/// A finished (possibly retried) service call.
#[derive(Debug)]
pub struct CallOutcome {
    pub result: std::result::Result<Generation, GenerateError>,
    pub attempts: u32,
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct StageExecutor {
    generator: Arc<dyn TextGenerator>,
    limiter: Arc<Semaphore>,
    options: GenerateOptions,
    retry: RetryPolicy,
    call_timeout: Duration,
    strict_required: bool,
    fallback_confidence: f64,
    default_confidence: f64,
    ceilings: ConfidenceCeilings,
    measure_batch_size: usize,
}

impl StageExecutor {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: &PipelineSettings) -> Self {
        Self {
            generator,
            limiter: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            options: GenerateOptions {
                temperature: settings.temperature,
                max_output_tokens: settings.max_output_tokens,
            },
            retry: RetryPolicy::new(settings.max_attempts, settings.retry_base),
            call_timeout: settings.call_timeout,
            strict_required: settings.strict_required_stages,
            fallback_confidence: settings.fallback_confidence.clamp(0.0, 0.3),
            default_confidence: settings.default_confidence,
            ceilings: settings.ceilings.clone(),
            measure_batch_size: settings.measure_batch_size.max(1),
        }
    }

    pub fn model_id(&self) -> &str {
        self.generator.model_id()
    }

    pub fn measure_batch_size(&self) -> usize {
        self.measure_batch_size
    }

    /// Issue one logical call: limiter slot (if limited), per-attempt
    /// timeout, retries on transient failures.
    pub async fn call(&self, stage: StageId, prompt: &str, admission: Admission) -> CallOutcome {
        let started = Instant::now();
        let attempted = with_retry(&self.retry, |attempt| async move {
            let _permit = match admission {
                Admission::Limited => Some(self.limiter.acquire().await.map_err(|_| {
                    GenerateError::Unavailable("concurrency limiter closed".into())
                })?),
                Admission::Direct => None,
            };
            debug!(stage = %stage, attempt, "requesting generation");
            match tokio::time::timeout(self.call_timeout, self.generator.generate(prompt, &self.options)).await {
                Ok(result) => result,
                Err(_) => Err(GenerateError::Timeout(self.call_timeout)),
            }
        })
        .await;

        CallOutcome {
            result: attempted.outcome,
            attempts: attempted.attempts,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run a single-request stage end to end.
    #[instrument(skip_all, fields(stage = %stage.id()))]
    pub async fn execute(
        &self,
        stage: &dyn Stage,
        ctx: &PipelineContext,
        admission: Admission,
    ) -> Result<StageResult> {
        let prompt = stage.build_prompt(ctx);
        debug!(prompt_chars = prompt.len(), "stage requested");
        let outcome = self.call(stage.id(), &prompt, admission).await;
        self.interpret(stage, ctx, outcome)
    }

    /// Turn a call outcome into a stage result.
    pub fn interpret(
        &self,
        stage: &dyn Stage,
        ctx: &PipelineContext,
        outcome: CallOutcome,
    ) -> Result<StageResult> {
        let id = stage.id();
        let generation = match outcome.result {
            Ok(generation) => generation,
            Err(err) => {
                if self.strict_required && id.is_required() {
                    return Err(ModelDocError::stage(id.as_str(), err.to_string()));
                }
                warn!(stage = %id, error = %err, attempts = outcome.attempts, "generation failed, using fallback");
                return Ok(self.fallback(stage, ctx, outcome.attempts, outcome.latency_ms));
            }
        };

        let usage = generation.usage.unwrap_or_default();
        let result = match parse_tolerant(&generation.text) {
            Some((parsed, strategy)) => {
                let claimed = number_field(&parsed, &["confidence"]);
                let confidence = self.clamp(id, claimed.unwrap_or(self.default_confidence));
                debug!(stage = %id, ?strategy, confidence, "response parsed");
                StageResult {
                    stage: id,
                    payload: stage.normalize(parsed, ctx),
                    confidence,
                    raw_text: generation.text,
                    used_fallback: false,
                    attempts: outcome.attempts,
                    usage,
                    latency_ms: outcome.latency_ms,
                }
            }
            None => {
                warn!(stage = %id, chars = generation.text.len(), "response not parseable, using empty payload");
                StageResult {
                    stage: id,
                    payload: stage.default_payload(ctx),
                    confidence: 0.0,
                    raw_text: generation.text,
                    used_fallback: true,
                    attempts: outcome.attempts,
                    usage,
                    latency_ms: outcome.latency_ms,
                }
            }
        };

        info!(
            stage = %id,
            confidence = result.confidence,
            used_fallback = result.used_fallback,
            attempts = result.attempts,
            "stage finished"
        );
        Ok(result)
    }

    /// The deterministic fallback result for a stage.
    pub fn fallback(
        &self,
        stage: &dyn Stage,
        ctx: &PipelineContext,
        attempts: u32,
        latency_ms: u64,
    ) -> StageResult {
        let id = stage.id();
        StageResult {
            stage: id,
            payload: stage.fallback_payload(ctx),
            confidence: self.clamp(id, self.fallback_confidence),
            raw_text: String::new(),
            used_fallback: true,
            attempts,
            usage: UsageStats::default(),
            latency_ms,
        }
    }

    fn clamp(&self, stage: StageId, confidence: f64) -> f64 {
        let confidence = if confidence.is_finite() {
            confidence
        } else {
            self.default_confidence
        };
        confidence.clamp(0.0, self.ceilings.for_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{ClassificationStage, GlossaryStage};
    use crate::testing::{Reply, ScriptedGenerator};
    use modeldoc_ingest::IntegrityReport;
    use modeldoc_shared::{Measure, ModelData};

    fn settings() -> PipelineSettings {
        PipelineSettings {
            retry_base: Duration::from_millis(1),
            call_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn ctx() -> PipelineContext {
        let model = ModelData {
            measures: vec![Measure {
                name: "Total Sales".into(),
                expression: "SUM(Sales[Amount])".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        PipelineContext::new(model, IntegrityReport::default(), None)
    }

    fn executor(generator: ScriptedGenerator, settings: &PipelineSettings) -> (StageExecutor, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        (StageExecutor::new(generator.clone(), settings), generator)
    }

    #[test]
    fn state_transitions() {
        use StageState::*;
        assert!(NotStarted.can_advance_to(Requested));
        assert!(Requested.can_advance_to(FallbackUsed));
        assert!(Succeeded.can_advance_to(Merged));
        assert!(!NotStarted.can_advance_to(Merged));
        assert!(!Merged.can_advance_to(Requested));
    }

    #[tokio::test]
    async fn clamps_claimed_confidence_to_ceiling() {
        let (exec, _) = executor(
            ScriptedGenerator::new().reply(
                StageId::Classification,
                r#"{"domain": "Retail", "stakeholders": ["Buyers"], "confidence": 1.5}"#,
            ),
            &settings(),
        );
        let result = exec
            .execute(&ClassificationStage, &ctx(), Admission::Direct)
            .await
            .unwrap();
        assert_eq!(result.state(), StageState::Succeeded);
        assert_eq!(result.confidence, 0.96);
        assert_eq!(result.payload["domain"], "Retail");
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn missing_confidence_uses_default() {
        let (exec, _) = executor(
            ScriptedGenerator::new().reply(StageId::Glossary, "```json\n{\"terms\": []}\n```"),
            &settings(),
        );
        let result = exec.execute(&GlossaryStage, &ctx(), Admission::Limited).await.unwrap();
        assert_eq!(result.confidence, 0.7);
        assert!(!result.used_fallback);
    }

    #[tokio::test]
    async fn unparseable_response_floors_confidence() {
        let (exec, _) = executor(
            ScriptedGenerator::new().reply(StageId::Glossary, "I could not do that."),
            &settings(),
        );
        let result = exec.execute(&GlossaryStage, &ctx(), Admission::Limited).await.unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(result.used_fallback);
        assert_eq!(result.raw_text, "I could not do that.");
        assert_eq!(result.payload["terms"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (exec, generator) = executor(
            ScriptedGenerator::new().script(
                StageId::Glossary,
                vec![
                    Reply::Fail(GenerateError::RateLimited { retry_after: None }),
                    Reply::Text(r#"{"terms": [], "confidence": 0.5}"#.into()),
                ],
            ),
            &settings(),
        );
        let result = exec.execute(&GlossaryStage, &ctx(), Admission::Limited).await.unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(generator.calls_for(StageId::Glossary), 2);
    }

    #[tokio::test]
    async fn permanent_failure_falls_back_without_retry() {
        let (exec, generator) = executor(
            ScriptedGenerator::new().fail(StageId::Glossary, GenerateError::Auth { status: 401 }),
            &settings(),
        );
        let result = exec.execute(&GlossaryStage, &ctx(), Admission::Limited).await.unwrap();
        assert_eq!(result.state(), StageState::FallbackUsed);
        assert_eq!(result.confidence, 0.1);
        assert_eq!(generator.calls_for(StageId::Glossary), 1);
        assert!(!result.payload["terms"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_a_call_failure() {
        let s = PipelineSettings {
            max_attempts: 1,
            call_timeout: Duration::from_millis(20),
            ..settings()
        };
        let (exec, _) = executor(
            ScriptedGenerator::new().script(StageId::Glossary, vec![Reply::Hang]),
            &s,
        );
        let result = exec.execute(&GlossaryStage, &ctx(), Admission::Limited).await.unwrap();
        assert!(result.used_fallback);
    }

    #[tokio::test]
    async fn strict_mode_aborts_required_stages_only() {
        let s = PipelineSettings {
            strict_required_stages: true,
            max_attempts: 1,
            ..settings()
        };
        let (exec, _) = executor(ScriptedGenerator::new(), &s);
        let err = exec
            .execute(&ClassificationStage, &ctx(), Admission::Direct)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDocError::Stage { .. }));

        let result = exec.execute(&GlossaryStage, &ctx(), Admission::Limited).await.unwrap();
        assert!(result.used_fallback);
    }
}

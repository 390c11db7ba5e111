//! The six prompt-driven stages.
//!
//! A [`Stage`] knows how to scope a request from the context, what its
//! payload looks like, and what to return when the service is unusable. The
//! [`executor`] owns everything else: calling, retrying, parsing, clamping.

pub mod architecture;
pub mod classification;
pub mod executor;
pub mod glossary;
pub mod measures;
pub mod polish;
pub mod synthesis;

use modeldoc_shared::StageId;
use serde_json::Value;

use crate::context::PipelineContext;

pub use architecture::ArchitectureStage;
pub use classification::ClassificationStage;
pub use executor::{Admission, StageExecutor, StageResult, StageState};
pub use glossary::GlossaryStage;
pub use measures::MeasureAnalysisStage;
pub use polish::PolishStage;
pub use synthesis::SynthesisStage;

/// One stage's request/response contract.
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// The scoped, schema-first prompt for this request.
    fn build_prompt(&self, ctx: &PipelineContext) -> String;

    /// Empty payload used when the response cannot be parsed at all.
    fn default_payload(&self, ctx: &PipelineContext) -> Value;

    /// Deterministic payload used when the call itself fails.
    fn fallback_payload(&self, ctx: &PipelineContext) -> Value;

    /// Shape a parsed response into this stage's payload. Anything missing
    /// or malformed is dropped here, never passed on.
    fn normalize(&self, parsed: Value, ctx: &PipelineContext) -> Value;
}

/// First line of every prompt; identifies the stage to the service logs and
/// to scripted generators.
pub fn stage_marker(stage: StageId) -> String {
    format!("[modeldoc stage: {}]", stage.as_str())
}

/// Assemble a prompt: marker, role, task, the exact response schema, then
/// the context sections as pretty JSON.
pub(crate) fn compose_prompt(
    stage: StageId,
    ctx: &PipelineContext,
    task: &str,
    schema: &str,
    sections: &[(&str, Value)],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&stage_marker(stage));
    prompt.push_str("\nYou are a senior BI analyst documenting a semantic model for business stakeholders.\n\n");
    prompt.push_str("TASK:\n");
    prompt.push_str(task);
    prompt.push_str("\n\nRespond with a single JSON value and nothing else, matching this schema exactly:\n");
    prompt.push_str(schema);
    prompt.push_str(
        "\nInclude a numeric \"confidence\" between 0 and 1 for how well the input supported your answer.\n",
    );

    if let Some(context) = &ctx.business_context {
        prompt.push_str("\nBUSINESS CONTEXT:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }

    for (title, value) in sections {
        prompt.push('\n');
        prompt.push_str(title);
        prompt.push_str(":\n");
        prompt.push_str(&serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldoc_ingest::IntegrityReport;
    use modeldoc_shared::ModelData;
    use serde_json::json;

    #[test]
    fn prompt_starts_with_marker_and_carries_context() {
        let ctx = PipelineContext::new(
            ModelData::default(),
            IntegrityReport::default(),
            Some("Quarterly board pack".into()),
        );
        let prompt = compose_prompt(
            StageId::Glossary,
            &ctx,
            "Define terms.",
            "{\"terms\": []}",
            &[("TABLES", json!(["Sales"]))],
        );
        assert!(prompt.starts_with("[modeldoc stage: glossary]"));
        assert!(prompt.contains("Quarterly board pack"));
        assert!(prompt.contains("TABLES:\n[\n  \"Sales\"\n]"));
    }
}

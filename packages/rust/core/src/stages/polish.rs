//! Stage 6: executive summary and highlights over the merged report.
//!
//! The domain and entity counts are handed over as fixed facts. The stage
//! writes prose around them; it never supplies numbers the report keeps.

use modeldoc_shared::StageId;
use serde_json::{Value, json};

use crate::coerce::default_insights;
use crate::context::PipelineContext;
use crate::json::{field, str_field, str_list};
use crate::stages::{Stage, compose_prompt};

const SCHEMA: &str = r#"{
  "summary": "string, executive summary of three to five sentences",
  "highlights": ["string, the most important points for stakeholders"],
  "insights": ["string, recommendations or cautions"],
  "confidence": 0.0
}"#;

/// The values the summary must quote verbatim.
fn fixed_facts(ctx: &PipelineContext) -> Value {
    let counts = ctx.model.counts();
    json!({
        "domain": ctx.domain(),
        "measures": counts.measures,
        "tables": counts.tables,
        "columns": counts.columns,
        "relationships": counts.relationships,
    })
}

pub struct PolishStage;

impl Stage for PolishStage {
    fn id(&self) -> StageId {
        StageId::Polish
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let report = ctx.output(StageId::Synthesis).unwrap_or(&Value::Null);
        let measures: Vec<Value> = field(report, &["measures"])
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|m| {
                        json!({
                            "name": m.get("name"),
                            "kind": m.get("kind"),
                            "purpose": m.get("purpose"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        compose_prompt(
            self.id(),
            ctx,
            "Write the executive summary and highlights for this documentation report. Use the values \
             in FIXED FACTS exactly as given; do not recount, round or restate them differently.",
            SCHEMA,
            &[
                ("FIXED FACTS", fixed_facts(ctx)),
                ("OVERVIEW", field(report, &["overview"]).cloned().unwrap_or(Value::Null)),
                ("MEASURES", Value::Array(measures)),
                ("INSIGHTS", field(report, &["insights"]).cloned().unwrap_or(Value::Null)),
                ("LINT FINDINGS", field(report, &["lintFindings"]).cloned().unwrap_or(Value::Null)),
            ],
        )
    }

    fn default_payload(&self, _ctx: &PipelineContext) -> Value {
        json!({"summary": "", "highlights": [], "insights": []})
    }

    fn fallback_payload(&self, ctx: &PipelineContext) -> Value {
        let counts = ctx.model.counts();
        let domain = ctx.domain();
        let mut summary = format!(
            "This {domain} model defines {} measures across {} tables and {} columns, connected by {} relationships.",
            counts.measures, counts.tables, counts.columns, counts.relationships
        );
        let stakeholders = ctx.stakeholders();
        if !stakeholders.is_empty() {
            summary.push_str(&format!(" It is intended for {}.", stakeholders.join(", ")));
        }

        let flagged: usize = ctx.insights.iter().map(|i| i.findings.len()).sum();
        let mut highlights = vec![format!("{} measures documented.", counts.measures)];
        if flagged > 0 {
            highlights.push(format!("{flagged} formula findings to review."));
        }
        let integrity = ctx.integrity.issues.len() + ctx.integrity.warnings.len();
        if integrity > 0 {
            highlights.push(format!("{integrity} model integrity notes."));
        }

        json!({
            "summary": summary,
            "highlights": highlights,
            "insights": default_insights(ctx),
        })
    }

    fn normalize(&self, parsed: Value, _ctx: &PipelineContext) -> Value {
        json!({
            "summary": str_field(&parsed, &["summary", "executiveSummary"]).unwrap_or_default(),
            "highlights": str_list(&parsed, &["highlights", "keyPoints"]).unwrap_or_default(),
            "insights": str_list(&parsed, &["insights", "recommendations"]).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldoc_ingest::IntegrityReport;
    use modeldoc_shared::{Measure, ModelData};

    fn ctx() -> PipelineContext {
        let model = ModelData {
            measures: vec![Measure {
                name: "Headcount".into(),
                expression: "COUNTROWS(Employee)".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        PipelineContext::new(model, IntegrityReport::default(), None)
            .with_classification("Human Resources".into(), vec!["HR Business Partners".into()])
    }

    #[test]
    fn prompt_states_fixed_facts() {
        let prompt = PolishStage.build_prompt(&ctx());
        assert!(prompt.contains("FIXED FACTS:"));
        assert!(prompt.contains("\"domain\": \"Human Resources\""));
        assert!(prompt.contains("\"measures\": 1"));
    }

    #[test]
    fn fallback_quotes_the_counts() {
        let payload = PolishStage.fallback_payload(&ctx());
        let summary = payload["summary"].as_str().unwrap();
        assert!(summary.starts_with("This Human Resources model defines 1 measures"));
        assert!(summary.contains("HR Business Partners"));
        assert!(!payload["insights"].as_array().unwrap().is_empty());
    }
}

//! Stage 5: draft the full report from every earlier stage.

use modeldoc_shared::StageId;
use serde_json::{Value, json};

use crate::coerce::coerce;
use crate::context::PipelineContext;
use crate::stages::{Stage, compose_prompt};

const SCHEMA: &str = r#"{
  "overview": {
    "domain": "string",
    "stakeholders": ["string"],
    "summary": "string, three to five sentences for a business reader"
  },
  "measures": [
    {
      "name": "string, exact measure name; one entry per input measure, in input order",
      "purpose": "string",
      "whenToUse": "string",
      "successIndicators": ["string"],
      "risks": ["string"],
      "dependencies": ["string"]
    }
  ],
  "tables": [{"name": "string, exact table name", "description": "string"}],
  "lintFindings": [
    {"measure": "string", "ruleId": "string", "severity": "info | warn | error", "message": "string"}
  ],
  "insights": ["string, cross-cutting observations"],
  "confidence": 0.0
}"#;

pub struct SynthesisStage;

impl Stage for SynthesisStage {
    fn id(&self) -> StageId {
        StageId::Synthesis
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let measures: Vec<Value> = ctx
            .model
            .measures
            .iter()
            .zip(ctx.insights.iter())
            .map(|(m, insight)| {
                json!({
                    "name": m.name,
                    "expression": m.expression,
                    "kind": insight.description.kind,
                    "lintFindings": insight.findings,
                })
            })
            .collect();
        let tables: Vec<Value> = ctx
            .model
            .tables
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "role": t.role.as_str(),
                    "rowCount": t.row_count,
                    "description": t.description,
                })
            })
            .collect();
        let relationships: Vec<String> = ctx.model.relationships.iter().map(|r| r.label()).collect();
        let stage_output = |stage| ctx.output(stage).cloned().unwrap_or(Value::Null);

        compose_prompt(
            self.id(),
            ctx,
            &format!(
                "Combine the analyses below into one documentation report for {} stakeholders ({}). \
                 The measures array must contain exactly {} entries, one per input measure, using the \
                 exact names. Do not invent tables, columns, relationships or measures.",
                ctx.domain(),
                ctx.stakeholders().join(", "),
                ctx.model.measures.len()
            ),
            SCHEMA,
            &[
                ("CLASSIFICATION", stage_output(StageId::Classification)),
                ("GLOSSARY", stage_output(StageId::Glossary)),
                ("ARCHITECTURE", stage_output(StageId::Architecture)),
                ("MEASURE ANALYSIS", stage_output(StageId::MeasureAnalysis)),
                ("MEASURES", Value::Array(measures)),
                ("TABLES", Value::Array(tables)),
                ("RELATIONSHIPS", json!(relationships)),
            ],
        )
    }

    fn default_payload(&self, _ctx: &PipelineContext) -> Value {
        json!({})
    }

    /// The report the merger builds from no draft at all.
    fn fallback_payload(&self, ctx: &PipelineContext) -> Value {
        serde_json::to_value(coerce(&json!({}), ctx)).unwrap_or_else(|_| json!({}))
    }

    fn normalize(&self, parsed: Value, _ctx: &PipelineContext) -> Value {
        // The draft is repaired by the merger; only a bare measure list is
        // lifted into shape here.
        match parsed {
            Value::Object(_) => parsed,
            Value::Array(items) => json!({ "measures": items }),
            _ => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldoc_ingest::IntegrityReport;
    use modeldoc_shared::{Measure, ModelData};

    fn ctx() -> PipelineContext {
        let model = ModelData {
            measures: vec![
                Measure {
                    name: "Total Sales".into(),
                    expression: "SUM(Sales[Amount])".into(),
                    ..Default::default()
                },
                Measure {
                    name: "Orders".into(),
                    expression: "COUNTROWS(Sales)".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        PipelineContext::new(model, IntegrityReport::default(), None)
            .with_output(StageId::Glossary, json!({"terms": [{"term": "Revenue", "definition": "Money in"}]}))
    }

    #[test]
    fn prompt_carries_upstream_outputs_and_expected_count() {
        let prompt = SynthesisStage.build_prompt(&ctx());
        assert!(prompt.contains("exactly 2 entries"));
        assert!(prompt.contains("\"Revenue\""));
        assert!(prompt.contains("ARCHITECTURE:\nnull"));
    }

    #[test]
    fn fallback_is_a_complete_report() {
        let payload = SynthesisStage.fallback_payload(&ctx());
        assert_eq!(payload["measures"].as_array().unwrap().len(), 2);
        assert_eq!(payload["glossary"][0]["term"], "Revenue");
        assert_eq!(payload["overview"]["measures"], 2);
    }

    #[test]
    fn normalize_lifts_bare_lists() {
        let ctx = ctx();
        let lifted = SynthesisStage.normalize(json!([{"name": "Orders"}]), &ctx);
        assert_eq!(lifted["measures"][0]["name"], "Orders");
        assert_eq!(SynthesisStage.normalize(json!(42), &ctx), json!({}));
    }
}

//! Stage 2: business glossary.

use modeldoc_shared::{StageId, TableRole};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::PipelineContext;
use crate::json::{array_field, str_field, str_list};
use crate::stages::{Stage, compose_prompt};

const SCHEMA: &str = r#"{
  "terms": [
    {
      "term": "string, the business term",
      "definition": "string, plain-language definition",
      "relatedMeasures": ["string, exact measure names"]
    }
  ],
  "confidence": 0.0
}"#;

/// One glossary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryTerm {
    pub term: String,
    pub definition: String,
    #[serde(default)]
    pub related_measures: Vec<String>,
}

/// Read terms out of a glossary payload, dropping malformed entries and
/// repeated terms.
pub fn terms(payload: &Value) -> Vec<GlossaryTerm> {
    let mut seen = std::collections::HashSet::new();
    array_field(payload, &["terms", "glossary"])
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let term = str_field(item, &["term", "name"])?;
                    let definition = str_field(item, &["definition", "description", "meaning"])?;
                    seen.insert(term.to_lowercase()).then(|| GlossaryTerm {
                        related_measures: str_list(item, &["relatedMeasures", "measures"])
                            .unwrap_or_default(),
                        term,
                        definition,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct GlossaryStage;

impl Stage for GlossaryStage {
    fn id(&self) -> StageId {
        StageId::Glossary
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
                    "displayFolder": m.display_folder,
                    "kind": insight.description.kind,
                    "description": m.description,
                })
            })
            .collect();
        let tables: Vec<&str> = ctx.model.tables.iter().map(|t| t.name.as_str()).collect();

        compose_prompt(
            self.id(),
            ctx,
            &format!(
                "Write a business glossary for a {} audience ({}). Define the business terms \
                 behind the measures and tables in plain language. Reference measures by their exact names.",
                ctx.domain(),
                ctx.stakeholders().join(", ")
            ),
            SCHEMA,
            &[("MEASURES", Value::Array(measures)), ("TABLES", json!(tables))],
        )
    }

    fn default_payload(&self, _ctx: &PipelineContext) -> Value {
        json!({"terms": []})
    }

    fn fallback_payload(&self, ctx: &PipelineContext) -> Value {
        let mut entries: Vec<GlossaryTerm> = ctx
            .model
            .measures
            .iter()
            .zip(ctx.insights.iter())
            .map(|(m, insight)| GlossaryTerm {
                term: m.name.clone(),
                definition: if m.description.trim().is_empty() {
                    insight.description.purpose.clone()
                } else {
                    m.description.clone()
                },
                related_measures: vec![m.name.clone()],
            })
            .collect();

        entries.extend(ctx.model.tables.iter().map(|t| GlossaryTerm {
            term: t.name.clone(),
            definition: if !t.description.trim().is_empty() {
                t.description.clone()
            } else if t.role == TableRole::Fact {
                format!("Fact table recording {} events or transactions.", t.name)
            } else {
                format!("Reference data describing {}.", t.name)
            },
            related_measures: Vec::new(),
        }));

        json!({ "terms": entries })
    }

    fn normalize(&self, parsed: Value, _ctx: &PipelineContext) -> Value {
        // A bare array of terms is accepted too.
        let payload = match parsed {
            Value::Array(items) => json!({ "terms": items }),
            other => other,
        };
        json!({ "terms": terms(&payload) })
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
                name: "Total Sales".into(),
                expression: "SUM(Sales[Amount])".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        PipelineContext::new(model, IntegrityReport::default(), None)
    }

    #[test]
    fn normalize_drops_malformed_and_duplicate_terms() {
        let parsed = json!([
            {"term": "Revenue", "definition": "Money in", "relatedMeasures": ["Total Sales"]},
            {"term": "revenue", "definition": "Duplicate"},
            {"term": "Orphan"},
            "not an object"
        ]);
        let payload = GlossaryStage.normalize(parsed, &ctx());
        let parsed_terms = terms(&payload);
        assert_eq!(parsed_terms.len(), 1);
        assert_eq!(parsed_terms[0].related_measures, vec!["Total Sales"]);
    }

    #[test]
    fn fallback_defines_every_measure() {
        let payload = GlossaryStage.fallback_payload(&ctx());
        let parsed_terms = terms(&payload);
        assert_eq!(parsed_terms.len(), 1);
        assert_eq!(parsed_terms[0].term, "Total Sales");
        assert!(!parsed_terms[0].definition.is_empty());
    }
}

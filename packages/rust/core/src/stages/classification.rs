//! Stage 1: business domain and audience.

use modeldoc_shared::StageId;
use serde_json::{Value, json};

use crate::context::PipelineContext;
use crate::domain::{default_stakeholders, guess_domain};
use crate::json::{str_field, str_list};
use crate::stages::{Stage, compose_prompt};

const SCHEMA: &str = r#"{
  "domain": "string, the primary business domain (e.g. Sales, Finance)",
  "subDomain": "string, optional narrower area",
  "stakeholders": ["string, roles who rely on this model"],
  "summary": "string, one or two sentences on what the model is for",
  "confidence": 0.0
}"#;

pub struct ClassificationStage;

impl ClassificationStage {
    /// Domain and stakeholders from a payload, backfilled from keywords.
    pub fn resolve(payload: &Value, ctx: &PipelineContext) -> (String, Vec<String>) {
        let domain = str_field(payload, &["domain"])
            .unwrap_or_else(|| guess_domain(&ctx.model).to_string());
        let stakeholders =
            str_list(payload, &["stakeholders"]).unwrap_or_else(|| default_stakeholders(&domain));
        (domain, stakeholders)
    }
}

impl Stage for ClassificationStage {
    fn id(&self) -> StageId {
        StageId::Classification
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let tables: Vec<Value> = ctx
            .model
            .tables
            .iter()
            .map(|t| json!({"name": t.name, "role": t.role.as_str(), "rowCount": t.row_count}))
            .collect();
        let measures: Vec<Value> = ctx
            .model
            .measures
            .iter()
            .map(|m| json!({"name": m.name, "displayFolder": m.display_folder}))
            .collect();

        compose_prompt(
            self.id(),
            ctx,
            "Classify the business domain of this model and name the stakeholders who use it. \
             Judge from table and measure names only.",
            SCHEMA,
            &[("TABLES", Value::Array(tables)), ("MEASURES", Value::Array(measures))],
        )
    }

    fn default_payload(&self, _ctx: &PipelineContext) -> Value {
        json!({"domain": "", "stakeholders": [], "summary": ""})
    }

    fn fallback_payload(&self, ctx: &PipelineContext) -> Value {
        let domain = guess_domain(&ctx.model);
        let counts = ctx.model.counts();
        json!({
            "domain": domain,
            "stakeholders": default_stakeholders(domain),
            "summary": format!(
                "A {domain} model with {} measures across {} tables.",
                counts.measures, counts.tables
            ),
        })
    }

    fn normalize(&self, parsed: Value, _ctx: &PipelineContext) -> Value {
        json!({
            "domain": str_field(&parsed, &["domain", "businessDomain"]).unwrap_or_default(),
            "subDomain": str_field(&parsed, &["subDomain"]).unwrap_or_default(),
            "stakeholders": str_list(&parsed, &["stakeholders", "audience"]).unwrap_or_default(),
            "summary": str_field(&parsed, &["summary", "description"]).unwrap_or_default(),
        })
    }
}

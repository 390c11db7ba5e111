//! Stage 4: per-measure analysis, in batches.
//!
//! Each batch is one request that sees only the tables, columns and other
//! measures its formulas mention. A failed batch falls back to heuristics for
//! its own measures; the other batches are unaffected.

use std::collections::HashSet;

use modeldoc_llm::UsageStats;
use modeldoc_shared::{Result, StageId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::context::PipelineContext;
use crate::json::{array_field, str_field, str_list};
use crate::stages::executor::{Admission, StageExecutor, StageResult};
use crate::stages::{Stage, compose_prompt};

const SCHEMA: &str = r#"{
  "measures": [
    {
      "name": "string, exact measure name from the input",
      "purpose": "string, what the measure tells the business",
      "whenToUse": "string, which questions it answers",
      "successIndicators": ["string, what good looks like"],
      "risks": ["string, ways the number can mislead"],
      "dependencies": ["string, Table[Column] or [Measure] references"]
    }
  ],
  "confidence": 0.0
}"#;

/// Generated analysis of one measure. Every field may be blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureAnalysis {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub when_to_use: String,
    #[serde(default)]
    pub success_indicators: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl MeasureAnalysis {
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            name: str_field(value, &["name", "measure", "measureName"])?,
            purpose: str_field(value, &["purpose", "description"]).unwrap_or_default(),
            when_to_use: str_field(value, &["whenToUse", "usage"]).unwrap_or_default(),
            success_indicators: str_list(value, &["successIndicators", "kpis"]).unwrap_or_default(),
            risks: str_list(value, &["risks", "caveats"]).unwrap_or_default(),
            dependencies: str_list(value, &["dependencies", "dependsOn"]).unwrap_or_default(),
        })
    }
}

/// Analyses in a payload, keyed by name and restricted to `allowed` names
/// when given. Unknown or repeated names are dropped.
pub fn analyses(payload: &Value, allowed: Option<&HashSet<String>>) -> Vec<MeasureAnalysis> {
    let items: Vec<Value> = match payload {
        Value::Array(items) => items.clone(),
        other => array_field(other, &["measures", "analyses"]).cloned().unwrap_or_default(),
    };
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(MeasureAnalysis::from_value)
        .filter(|a| {
            let key = a.name.to_lowercase();
            allowed.is_none_or(|names| names.contains(&key)) && seen.insert(key)
        })
        .collect()
}

/// One request's worth of measures, by index into the model.
pub struct MeasureBatch {
    pub indices: Vec<usize>,
}

impl MeasureBatch {
    fn names(&self, ctx: &PipelineContext) -> HashSet<String> {
        self.indices
            .iter()
            .filter_map(|i| ctx.model.measures.get(*i))
            .map(|m| m.name.to_lowercase())
            .collect()
    }

    /// Tables, columns and other measures mentioned by the batch formulas.
    pub fn scope(&self, ctx: &PipelineContext) -> Value {
        let formulas: Vec<String> = self
            .indices
            .iter()
            .filter_map(|i| ctx.model.measures.get(*i))
            .map(|m| m.expression.to_lowercase())
            .collect();
        let mentions = |needle: &str| formulas.iter().any(|f| f.contains(needle));

        let tables: Vec<&str> = ctx
            .model
            .tables
            .iter()
            .filter(|t| {
                let name = t.name.to_lowercase();
                mentions(&format!("'{name}'")) || formulas.iter().any(|f| references_bare_table(f, &name))
            })
            .map(|t| t.name.as_str())
            .collect();
        let in_scope: HashSet<String> = tables.iter().map(|t| t.to_lowercase()).collect();

        let columns: Vec<Value> = ctx
            .model
            .columns
            .iter()
            .filter(|c| {
                in_scope.contains(&c.table_name.to_lowercase())
                    && mentions(&format!("[{}]", c.name.to_lowercase()))
            })
            .map(|c| json!({"table": c.table_name, "name": c.name, "dataType": c.data_type}))
            .collect();

        let own = self.names(ctx);
        let referenced: Vec<&str> = ctx
            .model
            .measures
            .iter()
            .filter(|m| {
                let name = m.name.to_lowercase();
                !own.contains(&name) && mentions(&format!("[{name}]"))
            })
            .map(|m| m.name.as_str())
            .collect();

        json!({"tables": tables, "columns": columns, "referencedMeasures": referenced})
    }
}

/// True when `formula` holds `name[` with no identifier character before
/// `name`, so `Sales` does not match inside `BudgetSales[..]`.
fn references_bare_table(formula: &str, name: &str) -> bool {
    let needle = format!("{name}[");
    formula.match_indices(&needle).any(|(at, _)| {
        formula[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
    })
}

impl Stage for MeasureBatch {
    fn id(&self) -> StageId {
        StageId::MeasureAnalysis
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let measures: Vec<Value> = self
            .indices
            .iter()
            .filter_map(|i| Some((ctx.model.measures.get(*i)?, ctx.insights.get(*i)?)))
            .map(|(m, insight)| {
                json!({
                    "name": m.name,
                    "expression": m.expression,
                    "displayFolder": m.display_folder,
                    "formatString": m.format_string,
                    "heuristicKind": insight.description.kind,
                    "lintFindings": insight.findings.iter().map(|f| f.rule_id.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();

        compose_prompt(
            self.id(),
            ctx,
            &format!(
                "Explain each measure below for {} stakeholders ({}). Return exactly one entry per \
                 measure, using the exact measure names. Use only the tables and columns listed in SCOPE.",
                ctx.domain(),
                ctx.stakeholders().join(", ")
            ),
            SCHEMA,
            &[("MEASURES", Value::Array(measures)), ("SCOPE", self.scope(ctx))],
        )
    }

    fn default_payload(&self, _ctx: &PipelineContext) -> Value {
        json!({"measures": []})
    }

    fn fallback_payload(&self, ctx: &PipelineContext) -> Value {
        let entries: Vec<MeasureAnalysis> = self
            .indices
            .iter()
            .filter_map(|i| ctx.insights.get(*i))
            .map(|insight| MeasureAnalysis {
                name: insight.name.clone(),
                purpose: insight.description.purpose.clone(),
                when_to_use: insight.description.when_to_use.clone(),
                success_indicators: insight.description.success_indicators.clone(),
                risks: insight.description.risks.clone(),
                dependencies: insight.description.dependencies.clone(),
            })
            .collect();
        json!({ "measures": entries })
    }

    fn normalize(&self, parsed: Value, ctx: &PipelineContext) -> Value {
        let allowed = self.names(ctx);
        json!({ "measures": analyses(&parsed, Some(&allowed)) })
    }
}

/// The measure-analysis stage: splits measures into batches and merges the
/// batch results.
pub struct MeasureAnalysisStage;

impl MeasureAnalysisStage {
    pub fn batches(ctx: &PipelineContext, batch_size: usize) -> Vec<MeasureBatch> {
        let indices: Vec<usize> = (0..ctx.model.measures.len()).collect();
        indices
            .chunks(batch_size.max(1))
            .map(|chunk| MeasureBatch {
                indices: chunk.to_vec(),
            })
            .collect()
    }

    /// Deterministic result for every measure, used when the whole stage is
    /// lost.
    pub fn fallback(executor: &StageExecutor, ctx: &PipelineContext) -> StageResult {
        let all = MeasureBatch {
            indices: (0..ctx.model.measures.len()).collect(),
        };
        executor.fallback(&all, ctx, 0, 0)
    }

    #[instrument(skip_all, fields(measures = ctx.model.measures.len()))]
    pub async fn run(
        &self,
        executor: &StageExecutor,
        ctx: &PipelineContext,
        admission: Admission,
    ) -> Result<StageResult> {
        if ctx.model.measures.is_empty() {
            debug!("no measures to analyze, skipping call");
            return Ok(StageResult::without_call(
                StageId::MeasureAnalysis,
                json!({"measures": [], "note": "no measures to analyze"}),
                1.0,
            ));
        }

        let batches = Self::batches(ctx, executor.measure_batch_size());
        let mut entries = Vec::new();
        let mut raw = Vec::new();
        let mut weighted = 0.0;
        let mut any_fallback = false;
        let mut attempts = 0;
        let mut usage = UsageStats::default();
        let mut latency_ms = 0;

        for (n, batch) in batches.iter().enumerate() {
            let result = executor.execute(batch, ctx, admission).await?;
            debug!(batch = n, size = batch.indices.len(), confidence = result.confidence, "batch finished");

            weighted += result.confidence * batch.indices.len() as f64;
            any_fallback |= result.used_fallback;
            attempts += result.attempts;
            usage.tokens_in += result.usage.tokens_in;
            usage.tokens_out += result.usage.tokens_out;
            latency_ms += result.latency_ms;
            if !result.raw_text.is_empty() {
                raw.push(result.raw_text);
            }
            if let Some(items) = result.payload.get("measures").and_then(Value::as_array) {
                entries.extend(items.iter().cloned());
            }
        }

        Ok(StageResult {
            stage: StageId::MeasureAnalysis,
            payload: json!({ "measures": entries }),
            confidence: weighted / ctx.model.measures.len() as f64,
            raw_text: raw.join("\n"),
            used_fallback: any_fallback,
            attempts,
            usage,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::testing::{Reply, ScriptedGenerator};
    use modeldoc_ingest::IntegrityReport;
    use modeldoc_shared::{Column, Measure, ModelData, PipelineSettings, Table, TableRole};

    fn measure(name: &str, expression: &str) -> Measure {
        Measure {
            name: name.into(),
            expression: expression.into(),
            ..Default::default()
        }
    }

    fn table(name: &str) -> Table {
        Table {
            name: name.into(),
            row_count: None,
            description: String::new(),
            is_hidden: false,
            role: TableRole::Dimension,
        }
    }

    fn column(table: &str, name: &str) -> Column {
        Column {
            table_name: table.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    fn ctx(measures: Vec<Measure>) -> PipelineContext {
        let model = ModelData {
            measures,
            tables: vec![table("Sales"), table("Budget"), table("Customer")],
            columns: vec![
                column("Sales", "Amount"),
                column("Sales", "Qty"),
                column("Budget", "Amount"),
                column("Customer", "Name"),
            ],
            ..Default::default()
        };
        PipelineContext::new(model, IntegrityReport::default(), None)
    }

    fn settings(batch: usize) -> PipelineSettings {
        PipelineSettings {
            measure_batch_size: batch,
            retry_base: Duration::from_millis(1),
            max_attempts: 1,
            ..Default::default()
        }
    }

    #[test]
    fn scope_only_includes_mentioned_entities() {
        let ctx = ctx(vec![
            measure("Total Sales", "SUM(Sales[Amount])"),
            measure("Sales vs Budget", "[Total Sales] - SUM('Budget'[Amount])"),
        ]);
        let scope = MeasureBatch { indices: vec![0] }.scope(&ctx);
        assert_eq!(scope["tables"], json!(["Sales"]));
        assert_eq!(scope["columns"].as_array().unwrap().len(), 1);
        assert_eq!(scope["referencedMeasures"], json!([]));

        let scope = MeasureBatch { indices: vec![1] }.scope(&ctx);
        assert_eq!(scope["tables"], json!(["Budget"]));
        assert_eq!(scope["columns"][0]["table"], "Budget");
        assert_eq!(scope["referencedMeasures"], json!(["Total Sales"]));
    }

    #[test]
    fn scope_requires_a_table_name_boundary() {
        let model = ModelData {
            measures: vec![measure("Budget Gap", "SUM(BudgetSales[Amount])")],
            tables: vec![table("Sales"), table("BudgetSales")],
            ..Default::default()
        };
        let ctx = PipelineContext::new(model, IntegrityReport::default(), None);
        let scope = MeasureBatch { indices: vec![0] }.scope(&ctx);
        assert_eq!(scope["tables"], json!(["BudgetSales"]));

        assert!(references_bare_table("sum(sales[amount])", "sales"));
        assert!(!references_bare_table("sum(budgetsales[amount])", "sales"));
        assert!(!references_bare_table("sum(budget_sales[amount])", "sales"));
    }

    #[test]
    fn analyses_filter_unknown_and_repeated_names() {
        let allowed: HashSet<String> = ["total sales".to_string()].into();
        let payload = json!({"measures": [
            {"name": "Total Sales", "purpose": "Revenue"},
            {"name": "TOTAL SALES", "purpose": "Again"},
            {"name": "Invented", "purpose": "Nope"},
            {"purpose": "No name"}
        ]});
        let out = analyses(&payload, Some(&allowed));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].purpose, "Revenue");
    }

    #[tokio::test]
    async fn zero_measures_short_circuit_without_a_call() {
        let generator = Arc::new(ScriptedGenerator::new());
        let exec = StageExecutor::new(generator.clone(), &settings(25));
        let result = MeasureAnalysisStage
            .run(&exec, &ctx(vec![]), Admission::Limited)
            .await
            .unwrap();
        assert_eq!(result.confidence, 1.0);
        assert!(!result.used_fallback);
        assert_eq!(result.attempts, 0);
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_falls_back_for_its_measures_only() {
        let generator = Arc::new(ScriptedGenerator::new().script(
            StageId::MeasureAnalysis,
            vec![
                Reply::Text(r#"{"measures": [{"name": "A", "purpose": "Generated A"}], "confidence": 0.9}"#.into()),
                Reply::Fail(modeldoc_llm::GenerateError::Auth { status: 403 }),
            ],
        ));
        let exec = StageExecutor::new(generator.clone(), &settings(1));
        let ctx = ctx(vec![measure("A", "SUM(Sales[Amount])"), measure("B", "COUNTROWS(Sales)")]);

        let result = MeasureAnalysisStage.run(&exec, &ctx, Admission::Limited).await.unwrap();
        let out = analyses(&result.payload, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].purpose, "Generated A");
        assert!(!out[1].purpose.is_empty());
        assert!(result.used_fallback);
        assert!((result.confidence - (0.9 + 0.1) / 2.0).abs() < 1e-9);
        assert_eq!(generator.calls_for(StageId::MeasureAnalysis), 2);
    }
}

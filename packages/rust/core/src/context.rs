//! The read-mostly state threaded through the pipeline stages.
//!
//! Large parts are behind `Arc`, so extending a context for the next stage is
//! a cheap clone. Stages only ever see `&PipelineContext`; the orchestrator
//! produces the extended copies.

use std::collections::BTreeMap;
use std::sync::Arc;

use modeldoc_heuristics::{Finding, MeasureDescription, describe, lint};
use modeldoc_ingest::IntegrityReport;
use modeldoc_shared::{Measure, ModelData, StageId};
use serde_json::Value;

use crate::domain;

/// Deterministic analysis of one measure.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureInsight {
    pub name: String,
    pub description: MeasureDescription,
    pub findings: Vec<Finding>,
}

impl MeasureInsight {
    pub fn for_measure(measure: &Measure) -> Self {
        Self {
            name: measure.name.clone(),
            description: describe(&measure.name, &measure.expression),
            findings: lint(&measure.expression),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub model: Arc<ModelData>,
    pub integrity: Arc<IntegrityReport>,
    /// One entry per measure, in model order.
    pub insights: Arc<Vec<MeasureInsight>>,
    pub business_context: Option<String>,
    domain: Option<String>,
    stakeholders: Vec<String>,
    outputs: BTreeMap<StageId, Arc<Value>>,
}

impl PipelineContext {
    pub fn new(model: ModelData, integrity: IntegrityReport, business_context: Option<String>) -> Self {
        let insights = model.measures.iter().map(MeasureInsight::for_measure).collect();
        Self {
            model: Arc::new(model),
            integrity: Arc::new(integrity),
            insights: Arc::new(insights),
            business_context: business_context.filter(|c| !c.trim().is_empty()),
            domain: None,
            stakeholders: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// A copy carrying the classification result.
    pub fn with_classification(&self, domain: String, stakeholders: Vec<String>) -> Self {
        let mut next = self.clone();
        next.domain = Some(domain);
        next.stakeholders = stakeholders;
        next
    }

    /// A copy carrying one more stage payload.
    pub fn with_output(&self, stage: StageId, payload: Value) -> Self {
        let mut next = self.clone();
        next.outputs.insert(stage, Arc::new(payload));
        next
    }

    /// The classified domain, or the keyword guess before classification ran.
    pub fn domain(&self) -> String {
        self.domain
            .clone()
            .unwrap_or_else(|| domain::guess_domain(&self.model).to_string())
    }

    /// Stakeholders from classification, or the defaults for the domain.
    pub fn stakeholders(&self) -> Vec<String> {
        if self.stakeholders.is_empty() {
            domain::default_stakeholders(&self.domain())
        } else {
            self.stakeholders.clone()
        }
    }

    pub fn output(&self, stage: StageId) -> Option<&Value> {
        self.outputs.get(&stage).map(Arc::as_ref)
    }

    /// Insight for a measure name (case-insensitive).
    pub fn insight(&self, name: &str) -> Option<&MeasureInsight> {
        let needle = name.to_lowercase();
        self.insights.iter().find(|i| i.name.to_lowercase() == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldoc_ingest::check;
    use serde_json::json;

    fn model() -> ModelData {
        ModelData {
            measures: vec![Measure {
                name: "Total Sales".into(),
                expression: "SUM(Sales[Amount])".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn extensions_do_not_touch_the_original() {
        let model = model();
        let integrity = check(&model);
        let base = PipelineContext::new(model, integrity, Some("  ".into()));
        assert!(base.business_context.is_none());
        assert!(base.domain.is_none());

        let classified = base.with_classification("Retail".into(), vec!["Buyers".into()]);
        let extended = classified.with_output(StageId::Glossary, json!({"terms": []}));

        assert!(base.output(StageId::Glossary).is_none());
        assert!(extended.output(StageId::Glossary).is_some());
        assert_eq!(extended.domain(), "Retail");
        assert_eq!(extended.stakeholders(), vec!["Buyers".to_string()]);
        assert!(Arc::ptr_eq(&base.model, &extended.model));
    }

    #[test]
    fn insights_are_precomputed() {
        let model = model();
        let integrity = check(&model);
        let ctx = PipelineContext::new(model, integrity, None);
        let insight = ctx.insight("TOTAL SALES").unwrap();
        assert!(insight.findings.is_empty());
        assert_eq!(insight.description.dependencies, vec!["Sales[Amount]"]);
        assert_eq!(ctx.domain(), "Sales");
    }
}

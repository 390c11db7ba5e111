//! Stage 3: model architecture review.

use std::collections::HashSet;

use modeldoc_shared::{ModelData, StageId, TableRole};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::PipelineContext;
use crate::json::{str_field, str_list};
use crate::stages::{Stage, compose_prompt};

const SCHEMA: &str = r#"{
  "pattern": "string, e.g. star schema, snowflake schema, flat",
  "factTables": ["string, exact table names"],
  "dimensionTables": ["string, exact table names"],
  "notes": ["string, observations about the model structure"],
  "risks": ["string, structural risks for report authors"],
  "confidence": 0.0
}"#;

/// The architecture section of the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureSection {
    pub pattern: String,
    pub fact_tables: Vec<String>,
    pub dimension_tables: Vec<String>,
    pub notes: Vec<String>,
    pub risks: Vec<String>,
}

impl ArchitectureSection {
    /// Read from a payload; `None` when it says nothing.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let section = Self {
            pattern: str_field(payload, &["pattern", "schemaPattern", "schema"]).unwrap_or_default(),
            fact_tables: str_list(payload, &["factTables", "facts"]).unwrap_or_default(),
            dimension_tables: str_list(payload, &["dimensionTables", "dimensions"]).unwrap_or_default(),
            notes: str_list(payload, &["notes", "observations"]).unwrap_or_default(),
            risks: str_list(payload, &["risks"]).unwrap_or_default(),
        };
        (section != Self::default()).then_some(section)
    }
}

/// Describe the schema shape from roles and relationships alone.
fn infer_pattern(model: &ModelData) -> &'static str {
    let role_of = |name: &str| model.table(name).map(|t| t.role);
    let facts = model.tables.iter().filter(|t| t.role == TableRole::Fact).count();
    let dimensions = model.tables.len() - facts;

    if model.tables.is_empty() {
        return "unknown";
    }
    if model.relationships.is_empty() {
        return "flat";
    }
    if facts == 0 || dimensions == 0 {
        return "relational";
    }
    let chained_dimensions = model.relationships.iter().any(|r| {
        role_of(&r.from_table) == Some(TableRole::Dimension)
            && role_of(&r.to_table) == Some(TableRole::Dimension)
    });
    if chained_dimensions {
        "snowflake schema"
    } else {
        "star schema"
    }
}

pub struct ArchitectureStage;

impl Stage for ArchitectureStage {
    fn id(&self) -> StageId {
        StageId::Architecture
    }

    fn build_prompt(&self, ctx: &PipelineContext) -> String {
        let tables: Vec<Value> = ctx
            .model
            .tables
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "role": t.role.as_str(),
                    "rowCount": t.row_count,
                    "columnCount": ctx.model.column_count(&t.name),
                    "isHidden": t.is_hidden,
                })
            })
            .collect();
        let relationships: Vec<Value> = ctx
            .model
            .relationships
            .iter()
            .map(|r| {
                json!({
                    "from": format!("{}[{}]", r.from_table, r.from_column),
                    "to": format!("{}[{}]", r.to_table, r.to_column),
                    "cardinality": r.cardinality,
                    "direction": r.direction,
                    "active": r.active,
                })
            })
            .collect();
        let integrity: Vec<&str> = ctx
            .integrity
            .issues
            .iter()
            .chain(ctx.integrity.warnings.iter())
            .map(|i| i.message.as_str())
            .collect();

        compose_prompt(
            self.id(),
            ctx,
            &format!(
                "Review the structure of this {} model. Name the schema pattern, which tables hold \
                 facts and which describe dimensions, and the structural risks report authors should know.",
                ctx.domain()
            ),
            SCHEMA,
            &[
                ("TABLES", Value::Array(tables)),
                ("RELATIONSHIPS", Value::Array(relationships)),
                ("INTEGRITY FINDINGS", json!(integrity)),
            ],
        )
    }

    fn default_payload(&self, _ctx: &PipelineContext) -> Value {
        json!({})
    }

    fn fallback_payload(&self, ctx: &PipelineContext) -> Value {
        let model = &ctx.model;
        let by_role = |role: TableRole| -> Vec<String> {
            model
                .tables
                .iter()
                .filter(|t| t.role == role)
                .map(|t| t.name.clone())
                .collect()
        };

        let mut notes = vec![format!(
            "{} tables connected by {} relationships.",
            model.tables.len(),
            model.relationships.len()
        )];
        let bidirectional = model
            .relationships
            .iter()
            .filter(|r| r.direction == modeldoc_shared::Direction::Both)
            .count();
        if bidirectional > 0 {
            notes.push(format!("{bidirectional} relationships filter in both directions."));
        }
        let related: HashSet<String> = model
            .relationships
            .iter()
            .flat_map(|r| [r.from_table.to_lowercase(), r.to_table.to_lowercase()])
            .collect();
        let isolated: Vec<&str> = model
            .tables
            .iter()
            .filter(|t| !related.contains(&t.name.to_lowercase()))
            .map(|t| t.name.as_str())
            .collect();
        if !model.relationships.is_empty() && !isolated.is_empty() {
            notes.push(format!("Tables without relationships: {}.", isolated.join(", ")));
        }

        let risks: Vec<String> = ctx
            .integrity
            .issues
            .iter()
            .chain(ctx.integrity.warnings.iter())
            .map(|i| i.message.clone())
            .collect();

        serde_json::to_value(ArchitectureSection {
            pattern: infer_pattern(model).to_string(),
            fact_tables: by_role(TableRole::Fact),
            dimension_tables: by_role(TableRole::Dimension),
            notes,
            risks,
        })
        .unwrap_or_else(|_| json!({}))
    }

    fn normalize(&self, parsed: Value, _ctx: &PipelineContext) -> Value {
        ArchitectureSection::from_payload(&parsed)
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or_else(|| json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldoc_ingest::check;
    use modeldoc_shared::{Cardinality, Direction, Relationship, Table};

    fn table(name: &str, role: TableRole) -> Table {
        Table {
            name: name.into(),
            row_count: None,
            description: String::new(),
            is_hidden: false,
            role,
        }
    }

    fn rel(from: &str, to: &str) -> Relationship {
        Relationship {
            from_table: from.into(),
            from_column: "Key".into(),
            to_table: to.into(),
            to_column: "Key".into(),
            cardinality: Cardinality::ManyToOne,
            direction: Direction::Single,
            active: true,
        }
    }

    #[test]
    fn pattern_inference() {
        let mut model = ModelData {
            tables: vec![
                table("Sales", TableRole::Fact),
                table("Product", TableRole::Dimension),
                table("Category", TableRole::Dimension),
            ],
            relationships: vec![rel("Sales", "Product")],
            ..Default::default()
        };
        assert_eq!(infer_pattern(&model), "star schema");
        model.relationships.push(rel("Product", "Category"));
        assert_eq!(infer_pattern(&model), "snowflake schema");
        model.relationships.clear();
        assert_eq!(infer_pattern(&model), "flat");
        assert_eq!(infer_pattern(&ModelData::default()), "unknown");
    }

    #[test]
    fn fallback_reports_roles_and_integrity() {
        let model = ModelData {
            tables: vec![table("Orders", TableRole::Fact)],
            relationships: vec![rel("Orders", "Customer")],
            ..Default::default()
        };
        let integrity = check(&model);
        let ctx = PipelineContext::new(model, integrity, None);
        let section = ArchitectureSection::from_payload(&ArchitectureStage.fallback_payload(&ctx)).unwrap();
        assert_eq!(section.fact_tables, vec!["Orders"]);
        assert!(section.risks.iter().any(|r| r.contains("Customer")));
    }

    #[test]
    fn empty_response_normalizes_to_empty_object() {
        let ctx = PipelineContext::new(ModelData::default(), Default::default(), None);
        assert_eq!(ArchitectureStage.normalize(json!({"irrelevant": 1}), &ctx), json!({}));
    }
}

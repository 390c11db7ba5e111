//! Canonical model entities and run metadata for modeldoc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the report/metadata format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Model entities
// ---------------------------------------------------------------------------

/// A named computed formula (business metric).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    /// Identity key for all cross-stage joins (compared case-insensitively).
    pub name: String,
    /// Formula text.
    pub expression: String,
    #[serde(default)]
    pub display_folder: String,
    #[serde(default)]
    pub description: String,
    /// Home table of the measure, if exported.
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub format_string: String,
}

/// Inferred table role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableRole {
    Fact,
    Dimension,
}

impl TableRole {
    /// Infer the role from the row count alone.
    pub fn infer(row_count: Option<u64>, fact_row_threshold: u64) -> Self {
        match row_count {
            Some(rows) if rows > fact_row_threshold => Self::Fact,
            _ => Self::Dimension,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Dimension => "dimension",
        }
    }
}

/// A model table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_hidden: bool,
    pub role: TableRole,
}

/// A table column. Identity is `(table_name, name)`, case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub table_name: String,
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format_string: String,
}

impl Column {
    /// Lower-cased `(table, column)` identity.
    pub fn identity(&self) -> (String, String) {
        (self.table_name.to_lowercase(), self.name.to_lowercase())
    }
}

/// One/many shape of a relationship.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    #[default]
    #[serde(rename = "Many-to-One")]
    ManyToOne,
    #[serde(rename = "One-to-Many")]
    OneToMany,
    #[serde(rename = "One-to-One")]
    OneToOne,
    #[serde(rename = "Many-to-Many")]
    ManyToMany,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManyToOne => "Many-to-One",
            Self::OneToMany => "One-to-Many",
            Self::OneToOne => "One-to-One",
            Self::ManyToMany => "Many-to-Many",
        }
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-filter direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Single,
    Both,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => f.write_str("Single"),
            Self::Both => f.write_str("Both"),
        }
    }
}

/// A relationship between two table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality: Cardinality,
    pub direction: Direction,
    pub active: bool,
}

impl Relationship {
    /// `From[Col] -> To[Col]` label used in logs and messages.
    pub fn label(&self) -> String {
        format!(
            "{}[{}] -> {}[{}]",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }
}

/// The normalized model: every entity list the pipeline works from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelData {
    pub measures: Vec<Measure>,
    pub tables: Vec<Table>,
    pub columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
}

impl ModelData {
    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            measures: self.measures.len(),
            tables: self.tables.len(),
            columns: self.columns.len(),
            relationships: self.relationships.len(),
        }
    }

    /// Number of columns belonging to `table` (case-insensitive).
    pub fn column_count(&self, table: &str) -> usize {
        self.columns_of(table).count()
    }

    /// Columns belonging to `table`, matched case-insensitively.
    pub fn columns_of<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a Column> + 'a {
        let needle = table.to_lowercase();
        self.columns
            .iter()
            .filter(move |c| c.table_name.to_lowercase() == needle)
    }

    /// Find a table by case-insensitive name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        let needle = name.to_lowercase();
        self.tables.iter().find(|t| t.name.to_lowercase() == needle)
    }
}

/// Authoritative entity counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub measures: usize,
    pub tables: usize,
    pub columns: usize,
    pub relationships: usize,
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// The six prompt-driven pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Classification,
    Glossary,
    Architecture,
    MeasureAnalysis,
    Synthesis,
    Polish,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        Self::Classification,
        Self::Glossary,
        Self::Architecture,
        Self::MeasureAnalysis,
        Self::Synthesis,
        Self::Polish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Glossary => "glossary",
            Self::Architecture => "architecture",
            Self::MeasureAnalysis => "measure_analysis",
            Self::Synthesis => "synthesis",
            Self::Polish => "polish",
        }
    }

    /// Stages whose failure cannot be meaningfully faked.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Classification | Self::Synthesis | Self::Polish)
    }

    /// Weight in the final confidence average.
    pub fn confidence_weight(&self) -> f64 {
        match self {
            Self::MeasureAnalysis | Self::Synthesis | Self::Polish => 2.0,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Metadata record
// ---------------------------------------------------------------------------

/// Per-stage execution summary recorded in the metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: StageId,
    pub confidence: f64,
    pub used_fallback: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
}

/// Checksum of one written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactChecksum {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// The `metadata.json` record written alongside the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// Schema version for downstream compatibility tracking.
    pub schema_version: u32,
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub model: String,
    pub counts: EntityCounts,
    pub domain: String,
    /// SHA-256 over the input files, when read from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
    /// Input rows skipped as unparsable or duplicate.
    #[serde(default)]
    pub skipped_rows: usize,
    pub confidence: f64,
    #[serde(default)]
    pub stages: Vec<StageSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactChecksum>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn role_inference_uses_threshold() {
        assert_eq!(TableRole::infer(Some(50_000), 10_000), TableRole::Fact);
        assert_eq!(TableRole::infer(Some(10_000), 10_000), TableRole::Dimension);
        assert_eq!(TableRole::infer(None, 10_000), TableRole::Dimension);
        assert_eq!(TableRole::infer(Some(600), 500), TableRole::Fact);
    }

    #[test]
    fn cardinality_serializes_with_dashes() {
        let json = serde_json::to_string(&Cardinality::ManyToMany).expect("serialize");
        assert_eq!(json, r#""Many-to-Many""#);
        let parsed: Cardinality = serde_json::from_str(r#""One-to-One""#).expect("deserialize");
        assert_eq!(parsed, Cardinality::OneToOne);
    }

    #[test]
    fn column_count_is_case_insensitive() {
        let model = ModelData {
            columns: vec![
                Column {
                    table_name: "Sales".into(),
                    name: "Amount".into(),
                    ..Default::default()
                },
                Column {
                    table_name: "SALES".into(),
                    name: "Qty".into(),
                    ..Default::default()
                },
                Column {
                    table_name: "Customer".into(),
                    name: "ID".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(model.column_count("sales"), 2);
        assert_eq!(model.column_count("Product"), 0);
    }

    #[test]
    fn stage_weights_and_requirements() {
        assert!(StageId::Classification.is_required());
        assert!(!StageId::Glossary.is_required());
        assert_eq!(StageId::Synthesis.confidence_weight(), 2.0);
        assert_eq!(StageId::Architecture.confidence_weight(), 1.0);
        assert_eq!(StageId::MeasureAnalysis.as_str(), "measure_analysis");
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let meta = ReportMetadata {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            generated_at: Utc::now(),
            tool_version: "0.1.0".into(),
            model: "test".into(),
            counts: EntityCounts::default(),
            domain: "Sales".into(),
            input_fingerprint: None,
            skipped_rows: 2,
            confidence: 0.5,
            stages: vec![],
            artifacts: vec![],
        };
        let json = serde_json::to_string(&meta).expect("serialize");
        assert!(json.contains("\"schemaVersion\":1"));
        assert!(json.contains("\"generatedAt\""));
        assert!(!json.contains("inputFingerprint"));
        assert!(json.contains("\"skippedRows\":2"));
    }
}

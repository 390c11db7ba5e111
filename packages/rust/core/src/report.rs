//! The canonical report object.
//!
//! Every array field is always present. `measures` has exactly one entry per
//! input measure, in input order; the merger in [`crate::coerce`] enforces it.

use std::collections::BTreeMap;

use modeldoc_heuristics::{MeasureKind, Severity};
use modeldoc_ingest::IntegrityReport;
use modeldoc_shared::{Relationship, TableRole};
use serde::Serialize;

use crate::stages::architecture::ArchitectureSection;
use crate::stages::glossary::GlossaryTerm;

/// Required top-level fields, in serialization order.
pub const REQUIRED_FIELDS: [&str; 5] = ["overview", "measures", "tables", "relationships", "lintFindings"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub overview: Overview,
    pub measures: Vec<ReportMeasure>,
    pub tables: Vec<ReportTable>,
    pub relationships: Vec<Relationship>,
    pub lint_findings: Vec<ReportFinding>,
    pub integrity: IntegrityReport,
    pub glossary: Vec<GlossaryTerm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<ArchitectureSection>,
    pub insights: Vec<String>,
    pub confidence: ConfidenceBlock,
}

/// Headline section. The counts come from the parsed input, never from a
/// generation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub domain: String,
    pub stakeholders: Vec<String>,
    pub summary: String,
    pub highlights: Vec<String>,
    pub measures: usize,
    pub tables: usize,
    pub columns: usize,
    pub relationships: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeasure {
    pub name: String,
    pub expression: String,
    pub display_folder: String,
    pub table_name: String,
    pub format_string: String,
    pub kind: MeasureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    pub purpose: String,
    pub when_to_use: String,
    pub success_indicators: Vec<String>,
    pub risks: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTable {
    pub name: String,
    pub role: TableRole,
    pub row_count: Option<u64>,
    pub column_count: usize,
    pub is_hidden: bool,
    pub description: String,
    pub columns: Vec<ReportColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportColumn {
    pub name: String,
    pub data_type: String,
    pub is_key: bool,
    pub is_hidden: bool,
}

/// A lint finding attributed to a measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFinding {
    pub measure: String,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfidenceBlock {
    pub overall: f64,
    pub stages: BTreeMap<String, f64>,
}

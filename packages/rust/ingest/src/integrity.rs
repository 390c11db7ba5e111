//! Structural consistency checks over a normalized model.
//!
//! Checking is pure and never fails: problems become issues (broken
//! references, duplicate columns) or warnings (legal but risky shapes).

use std::collections::{HashMap, HashSet};

use modeldoc_shared::{Cardinality, ModelData, Relationship};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    UnknownTable,
    UnknownColumn,
    DuplicateColumn,
    ManyToMany,
    InactiveRelationship,
    /// References could not be checked because no tables or columns loaded.
    UncheckedReferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub kind: IssueKind,
    /// The relationship label or column identity concerned.
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegritySummary {
    pub relationships_checked: usize,
    pub issues: usize,
    pub warnings: usize,
    pub unknown_tables: usize,
    pub unknown_columns: usize,
    pub duplicate_columns: usize,
    pub many_to_many: usize,
    pub inactive: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    pub warnings: Vec<IntegrityIssue>,
    pub summary: IntegritySummary,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.warnings.is_empty()
    }

    fn issue(&mut self, kind: IssueKind, subject: impl Into<String>, message: String) {
        self.issues.push(IntegrityIssue {
            kind,
            subject: subject.into(),
            message,
        });
    }

    fn warning(&mut self, kind: IssueKind, subject: impl Into<String>, message: String) {
        self.warnings.push(IntegrityIssue {
            kind,
            subject: subject.into(),
            message,
        });
    }
}

/// Validate one side of a relationship. An unknown table yields a single
/// issue; column checks only run against known tables.
fn check_side(
    report: &mut IntegrityReport,
    rel: &Relationship,
    table: &str,
    column: &str,
    tables: Option<&HashSet<String>>,
    columns: Option<&HashSet<(String, String)>>,
) {
    let table_key = table.to_lowercase();
    if let Some(tables) = tables {
        if !tables.contains(&table_key) {
            report.summary.unknown_tables += 1;
            report.issue(
                IssueKind::UnknownTable,
                rel.label(),
                format!("relationship {} references unknown table `{table}`", rel.label()),
            );
            return;
        }
    }
    if let Some(columns) = columns {
        if !columns.contains(&(table_key, column.to_lowercase())) {
            report.summary.unknown_columns += 1;
            report.issue(
                IssueKind::UnknownColumn,
                rel.label(),
                format!(
                    "relationship {} references unknown column `{table}[{column}]`",
                    rel.label()
                ),
            );
        }
    }
}

/// Check relationship references, column uniqueness, many-to-many and
/// inactive relationships. Reference checks against an empty table or column
/// set are skipped with a single warning each.
pub fn check(model: &ModelData) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let tables: HashSet<String> = model.tables.iter().map(|t| t.name.to_lowercase()).collect();
    let mut column_counts: HashMap<(String, String), usize> = HashMap::new();
    let mut column_order = Vec::new();
    for column in &model.columns {
        let identity = column.identity();
        let count = column_counts.entry(identity.clone()).or_insert(0);
        if *count == 0 {
            column_order.push((identity, column));
        }
        *count += 1;
    }
    let columns: HashSet<(String, String)> = column_counts.keys().cloned().collect();

    let has_relationships = !model.relationships.is_empty();
    let table_set = if tables.is_empty() {
        if has_relationships {
            report.warning(
                IssueKind::UncheckedReferences,
                "tables",
                "no tables loaded; relationship table references were not checked".into(),
            );
        }
        None
    } else {
        Some(&tables)
    };
    let column_set = if columns.is_empty() {
        if has_relationships {
            report.warning(
                IssueKind::UncheckedReferences,
                "columns",
                "no columns loaded; relationship column references were not checked".into(),
            );
        }
        None
    } else {
        Some(&columns)
    };

    for rel in &model.relationships {
        report.summary.relationships_checked += 1;
        check_side(&mut report, rel, &rel.from_table, &rel.from_column, table_set, column_set);
        check_side(&mut report, rel, &rel.to_table, &rel.to_column, table_set, column_set);

        if rel.cardinality == Cardinality::ManyToMany {
            report.summary.many_to_many += 1;
            report.warning(
                IssueKind::ManyToMany,
                rel.label(),
                format!(
                    "relationship {} is many-to-many; totals may be ambiguous",
                    rel.label()
                ),
            );
        }
        if !rel.active {
            report.summary.inactive += 1;
            report.warning(
                IssueKind::InactiveRelationship,
                rel.label(),
                format!(
                    "relationship {} is inactive; it only applies through USERELATIONSHIP",
                    rel.label()
                ),
            );
        }
    }

    for (identity, column) in column_order {
        let occurrences = column_counts.get(&identity).copied().unwrap_or(0);
        if occurrences > 1 {
            report.summary.duplicate_columns += 1;
            report.issue(
                IssueKind::DuplicateColumn,
                format!("{}[{}]", column.table_name, column.name),
                format!(
                    "column {}[{}] is defined {occurrences} times",
                    column.table_name, column.name
                ),
            );
        }
    }

    report.summary.issues = report.issues.len();
    report.summary.warnings = report.warnings.len();
    report
}

//! Raw rows → canonical entities.
//!
//! Normalization is total: rows that cannot yield an entity are counted as
//! skipped, never raised. Running it over its own output yields the same
//! records.

use std::collections::HashSet;
use std::sync::LazyLock;

use modeldoc_heuristics::infer_format_string;
use modeldoc_shared::{Cardinality, Column, Measure, ModelData, Relationship, Table, TableRole};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::fields::{self, RawRow, lookup, parse_bool, parse_count};
use crate::relationship::{
    cardinality_from_sides, parse_cardinality, parse_definition, parse_direction,
};

/// `'Table'[Column]` or `Table[Column]` packed into one cell.
static QUALIFIED_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:'((?:[^']|'')+)'|([^\[\]']+?))\s*\[([^\]]+)\]\s*$").expect("valid regex")
});

/// Whole-word `id` or `key` anywhere in a column name.
static KEY_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(id|key)\b").expect("valid regex"));

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Row accounting for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub rows: usize,
    pub kept: usize,
    /// Rows missing a required field.
    pub skipped: usize,
    /// Rows dropped because an earlier row had the same identity.
    pub duplicates: usize,
    /// Definition strings that matched no accepted shape.
    pub unparsable: usize,
}

/// Row accounting for a whole ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub measures: EntityStats,
    pub tables: EntityStats,
    pub columns: EntityStats,
    pub relationships: EntityStats,
}

impl IngestStats {
    pub fn total_skipped(&self) -> usize {
        [self.measures, self.tables, self.columns, self.relationships]
            .iter()
            .map(|s| s.skipped + s.duplicates)
            .sum()
    }
}

/// Records produced from one entity's rows, with their accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub stats: EntityStats,
}

// Written out so `T` needs no `Default`.
impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            stats: EntityStats::default(),
        }
    }
}

/// The raw rows of each export, as read from disk.
#[derive(Debug, Clone, Default)]
pub struct RawModel {
    pub measures: Vec<RawRow>,
    pub tables: Vec<RawRow>,
    pub columns: Vec<RawRow>,
    pub relationships: Vec<RawRow>,
}

// ---------------------------------------------------------------------------
// Measures
// ---------------------------------------------------------------------------

/// Drop a leading `Name =` / `Name :=` that some exports prepend to the
/// formula. `==` is strict equality and is left alone.
fn strip_name_prefix<'a>(name: &str, expression: &'a str) -> &'a str {
    let trimmed = expression.trim_start();
    let Some(head) = trimmed.get(..name.len()) else {
        return expression;
    };
    if !head.eq_ignore_ascii_case(name) {
        return expression;
    }
    let rest = trimmed[name.len()..].trim_start();
    if let Some(body) = rest.strip_prefix(":=") {
        return body.trim();
    }
    if rest.starts_with("==") {
        return expression;
    }
    match rest.strip_prefix('=') {
        Some(body) => body.trim(),
        None => expression,
    }
}

/// Normalize measure rows. Names are unique case-insensitively; the first
/// occurrence wins.
pub fn normalize_measures(rows: &[RawRow]) -> Normalized<Measure> {
    let mut out = Normalized::<Measure>::default();
    out.stats.rows = rows.len();
    let mut seen = HashSet::new();

    for row in rows {
        let Some(name) = lookup(row, &fields::measure::NAME) else {
            out.stats.skipped += 1;
            continue;
        };
        if !seen.insert(name.to_lowercase()) {
            debug!(measure = %name, "dropping duplicate measure");
            out.stats.duplicates += 1;
            continue;
        }

        let raw_expression = lookup(row, &fields::measure::EXPRESSION).unwrap_or_default();
        let expression = strip_name_prefix(&name, &raw_expression).to_string();
        let format_string = lookup(row, &fields::measure::FORMAT_STRING)
            .unwrap_or_else(|| infer_format_string(&name, &expression).to_string());

        out.records.push(Measure {
            expression,
            display_folder: lookup(row, &fields::measure::DISPLAY_FOLDER).unwrap_or_default(),
            description: lookup(row, &fields::measure::DESCRIPTION).unwrap_or_default(),
            table_name: lookup(row, &fields::measure::TABLE).unwrap_or_default(),
            format_string,
            name,
        });
    }

    out.stats.kept = out.records.len();
    out
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn parse_role(value: &str) -> Option<TableRole> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fact" | "facts" | "fact table" => Some(TableRole::Fact),
        "dimension" | "dim" | "dimension table" | "lookup" => Some(TableRole::Dimension),
        _ => None,
    }
}

/// Normalize table rows. An explicit role cell wins over row-count
/// inference; tables with more than `fact_row_threshold` rows are facts.
pub fn normalize_tables(rows: &[RawRow], fact_row_threshold: u64) -> Normalized<Table> {
    let mut out = Normalized::<Table>::default();
    out.stats.rows = rows.len();
    let mut seen = HashSet::new();

    for row in rows {
        let Some(name) = lookup(row, &fields::table::NAME) else {
            out.stats.skipped += 1;
            continue;
        };
        if !seen.insert(name.to_lowercase()) {
            out.stats.duplicates += 1;
            continue;
        }

        let row_count = lookup(row, &fields::table::ROW_COUNT).and_then(|v| parse_count(&v));
        let role = lookup(row, &fields::table::ROLE)
            .and_then(|v| parse_role(&v))
            .unwrap_or_else(|| TableRole::infer(row_count, fact_row_threshold));

        out.records.push(Table {
            name,
            row_count,
            description: lookup(row, &fields::table::DESCRIPTION).unwrap_or_default(),
            is_hidden: lookup(row, &fields::table::IS_HIDDEN)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            role,
        });
    }

    out.stats.kept = out.records.len();
    out
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Split `'Table'[Column]` into its parts.
fn split_qualified(name: &str) -> Option<(String, String)> {
    let caps = QUALIFIED_COLUMN.captures(name)?;
    let table = caps
        .get(1)
        .map(|m| m.as_str().replace("''", "'"))
        .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))?;
    let column = caps.get(3)?.as_str().trim().to_string();
    let table = table.trim().to_string();
    (!table.is_empty() && !column.is_empty()).then_some((table, column))
}

/// Key-ness inferred from the name: a whole-word `id`/`key`, or a name
/// ending in `Id`/`Key` (`CustomerID`, `DateKey`).
pub fn looks_like_key(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    KEY_WORD.is_match(name) || lower.ends_with("id") || lower.ends_with("key")
}

/// Normalize column rows. Duplicates are kept here; integrity checking
/// reports them.
pub fn normalize_columns(rows: &[RawRow]) -> Normalized<Column> {
    let mut out = Normalized::<Column>::default();
    out.stats.rows = rows.len();

    for row in rows {
        let Some(raw_name) = lookup(row, &fields::column::NAME) else {
            out.stats.skipped += 1;
            continue;
        };
        let explicit_table = lookup(row, &fields::column::TABLE);

        let (table_name, name) = match split_qualified(&raw_name) {
            Some((table, column)) => (explicit_table.unwrap_or(table), column),
            None => match explicit_table {
                Some(table) => (table, raw_name),
                None => {
                    out.stats.skipped += 1;
                    continue;
                }
            },
        };

        let is_key = lookup(row, &fields::column::IS_KEY)
            .and_then(|v| parse_bool(&v))
            .unwrap_or_else(|| looks_like_key(&name));

        out.records.push(Column {
            table_name,
            is_key,
            data_type: lookup(row, &fields::column::DATA_TYPE).unwrap_or_default(),
            is_hidden: lookup(row, &fields::column::IS_HIDDEN)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            description: lookup(row, &fields::column::DESCRIPTION).unwrap_or_default(),
            format_string: lookup(row, &fields::column::FORMAT_STRING).unwrap_or_default(),
            name,
        });
    }

    out.stats.kept = out.records.len();
    out
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

fn explicit_cardinality(row: &RawRow) -> Option<Cardinality> {
    lookup(row, &fields::relationship::CARDINALITY)
        .and_then(|v| parse_cardinality(&v))
        .or_else(|| {
            let from = lookup(row, &fields::relationship::FROM_CARDINALITY)?;
            let to = lookup(row, &fields::relationship::TO_CARDINALITY)?;
            cardinality_from_sides(&from, &to)
        })
}

/// Normalize relationship rows. A parsable definition string wins; otherwise
/// the discrete from/to fields are used. Rows with neither are skipped.
pub fn normalize_relationships(rows: &[RawRow]) -> Normalized<Relationship> {
    let mut out = Normalized::<Relationship>::default();
    out.stats.rows = rows.len();

    for row in rows {
        let definition = lookup(row, &fields::relationship::DEFINITION);
        let parsed = definition.as_deref().and_then(parse_definition);

        let explicit_direction =
            lookup(row, &fields::relationship::DIRECTION).and_then(|v| parse_direction(&v));
        let explicit_active =
            lookup(row, &fields::relationship::ACTIVE).and_then(|v| parse_bool(&v));

        let relationship = match parsed {
            Some(p) => Relationship {
                from_table: p.from_table,
                from_column: p.from_column,
                to_table: p.to_table,
                to_column: p.to_column,
                cardinality: p.cardinality,
                direction: explicit_direction.unwrap_or(p.direction),
                active: explicit_active.unwrap_or(p.active),
            },
            None => {
                let discrete = (
                    lookup(row, &fields::relationship::FROM_TABLE),
                    lookup(row, &fields::relationship::FROM_COLUMN),
                    lookup(row, &fields::relationship::TO_TABLE),
                    lookup(row, &fields::relationship::TO_COLUMN),
                );
                let (Some(from_table), Some(from_column), Some(to_table), Some(to_column)) =
                    discrete
                else {
                    if let Some(text) = &definition {
                        debug!(definition = %text, "unparsable relationship definition");
                        out.stats.unparsable += 1;
                    }
                    out.stats.skipped += 1;
                    continue;
                };
                Relationship {
                    from_table,
                    from_column,
                    to_table,
                    to_column,
                    cardinality: explicit_cardinality(row).unwrap_or_default(),
                    direction: explicit_direction.unwrap_or_default(),
                    active: explicit_active.unwrap_or(true),
                }
            }
        };

        out.records.push(relationship);
    }

    out.stats.kept = out.records.len();
    out
}

// ---------------------------------------------------------------------------
// Whole model
// ---------------------------------------------------------------------------

/// Normalize every export into the canonical model.
pub fn normalize(raw: &RawModel, fact_row_threshold: u64) -> (ModelData, IngestStats) {
    let measures = normalize_measures(&raw.measures);
    let tables = normalize_tables(&raw.tables, fact_row_threshold);
    let columns = normalize_columns(&raw.columns);
    let relationships = normalize_relationships(&raw.relationships);

    let stats = IngestStats {
        measures: measures.stats,
        tables: tables.stats,
        columns: columns.stats,
        relationships: relationships.stats,
    };
    let model = ModelData {
        measures: measures.records,
        tables: tables.records,
        columns: columns.records,
        relationships: relationships.records,
    };
    (model, stats)
}

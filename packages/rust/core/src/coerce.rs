//! Repair a drafted report into a structurally complete [`FinalReport`].
//!
//! The draft may be anything: valid JSON, JSON wrapped in prose, an array, or
//! garbage. Whatever it says, the result has every required field, exactly one
//! measure per input measure in input order, column counts recomputed from the
//! parsed columns, and the parsed relationships verbatim.
//!
//! Enriched measure fields are resolved independently, each by [`coalesce`]
//! over `synthesis draft > measure analysis > heuristic > parsed input`.

use std::collections::{HashMap, HashSet};

use modeldoc_heuristics::Severity;
use modeldoc_shared::{StageId, TableRole};
use serde_json::{Value, json};
use tracing::debug;

use crate::context::PipelineContext;
use crate::json::{array_field, field, str_field, str_list};
use crate::parse::parse_tolerant;
use crate::report::{
    ConfidenceBlock, FinalReport, Overview, ReportColumn, ReportFinding, ReportMeasure, ReportTable,
};
use crate::stages::architecture::ArchitectureSection;
use crate::stages::glossary::{GlossaryTerm, terms};
use crate::stages::measures::{MeasureAnalysis, analyses};

// ---------------------------------------------------------------------------
// Coalesce
// ---------------------------------------------------------------------------

/// Whether a value carries content worth keeping.
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

/// The first present candidate, in priority order, or the empty value.
pub fn coalesce<T, I>(candidates: I) -> T
where
    T: Presence + Default,
    I: IntoIterator<Item = Option<T>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|v| v.is_present())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Coerce serialized draft text. Unparseable text counts as an empty draft.
pub fn coerce_text(raw: &str, ctx: &PipelineContext) -> FinalReport {
    let draft = parse_tolerant(raw).map(|(value, _)| value).unwrap_or_else(|| json!({}));
    coerce(&draft, ctx)
}

/// Coerce a draft report against the authoritative inputs in `ctx`.
pub fn coerce(raw: &Value, ctx: &PipelineContext) -> FinalReport {
    if let Value::String(text) = raw {
        return coerce_text(text, ctx);
    }
    let draft = raw;

    FinalReport {
        overview: overview(draft, ctx),
        measures: measures(draft, ctx),
        tables: tables(draft, ctx),
        relationships: ctx.model.relationships.clone(),
        lint_findings: lint_findings(draft, ctx),
        integrity: ctx.integrity.as_ref().clone(),
        glossary: glossary(draft, ctx),
        architecture: architecture(draft, ctx),
        insights: coalesce([str_list(draft, &["insights"]), Some(default_insights(ctx))]),
        confidence: ConfidenceBlock::default(),
    }
}

/// Fold the polish payload into a coerced report. Counts are untouched.
pub fn apply_polish(report: &mut FinalReport, payload: &Value) {
    report.overview.summary = coalesce([
        str_field(payload, &["summary", "executiveSummary"]),
        Some(std::mem::take(&mut report.overview.summary)),
    ]);
    report.overview.highlights = coalesce([
        str_list(payload, &["highlights", "keyPoints"]),
        Some(std::mem::take(&mut report.overview.highlights)),
    ]);
    report.insights = coalesce([
        str_list(payload, &["insights"]),
        Some(std::mem::take(&mut report.insights)),
    ]);
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

fn overview(draft: &Value, ctx: &PipelineContext) -> Overview {
    let section = field(draft, &["overview"]).unwrap_or(&Value::Null);
    let classification = ctx.output(StageId::Classification).unwrap_or(&Value::Null);
    let counts = ctx.model.counts();
    let domain = ctx.domain();

    Overview {
        summary: coalesce([
            str_field(section, &["summary", "description"]),
            str_field(classification, &["summary"]),
            Some(format!(
                "A {domain} model with {} measures across {} tables.",
                counts.measures, counts.tables
            )),
        ]),
        stakeholders: coalesce([str_list(section, &["stakeholders"]), Some(ctx.stakeholders())]),
        highlights: str_list(section, &["highlights"]).unwrap_or_default(),
        domain,
        measures: counts.measures,
        tables: counts.tables,
        columns: counts.columns,
        relationships: counts.relationships,
    }
}

fn by_name(entries: Vec<MeasureAnalysis>) -> HashMap<String, MeasureAnalysis> {
    entries.into_iter().map(|a| (a.name.to_lowercase(), a)).collect()
}

/// One enriched field: generated sources first, then heuristic, then raw.
fn enriched<T>(
    generated: &[Option<&MeasureAnalysis>; 2],
    get: impl Fn(&MeasureAnalysis) -> &T,
    heuristic: &T,
    raw: T,
) -> T
where
    T: Presence + Default + Clone,
{
    coalesce(
        generated
            .iter()
            .map(|source| source.map(|a| get(a).clone()))
            .chain([Some(heuristic.clone()), Some(raw)]),
    )
}

fn measures(draft: &Value, ctx: &PipelineContext) -> Vec<ReportMeasure> {
    let drafted = by_name(analyses(draft, None));
    let analyzed = by_name(
        ctx.output(StageId::MeasureAnalysis)
            .map(|payload| analyses(payload, None))
            .unwrap_or_default(),
    );
    if drafted.len() != ctx.model.measures.len() {
        debug!(
            drafted = drafted.len(),
            expected = ctx.model.measures.len(),
            "repairing measure list"
        );
    }

    ctx.model
        .measures
        .iter()
        .zip(ctx.insights.iter())
        .map(|(m, insight)| {
            let key = m.name.to_lowercase();
            let generated = [drafted.get(&key), analyzed.get(&key)];
            let h = &insight.description;
            ReportMeasure {
                name: m.name.clone(),
                expression: m.expression.clone(),
                display_folder: m.display_folder.clone(),
                table_name: m.table_name.clone(),
                format_string: m.format_string.clone(),
                kind: h.kind,
                window: h.window.clone(),
                purpose: enriched(&generated, |a| &a.purpose, &h.purpose, m.description.clone()),
                when_to_use: enriched(&generated, |a| &a.when_to_use, &h.when_to_use, String::new()),
                success_indicators: enriched(
                    &generated,
                    |a| &a.success_indicators,
                    &h.success_indicators,
                    Vec::new(),
                ),
                risks: enriched(&generated, |a| &a.risks, &h.risks, Vec::new()),
                dependencies: enriched(&generated, |a| &a.dependencies, &h.dependencies, Vec::new()),
            }
        })
        .collect()
}

fn tables(draft: &Value, ctx: &PipelineContext) -> Vec<ReportTable> {
    let described: HashMap<String, String> = array_field(draft, &["tables"])
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = str_field(item, &["name", "table"])?;
                    let description = str_field(item, &["description", "purpose"])?;
                    Some((name.to_lowercase(), description))
                })
                .collect()
        })
        .unwrap_or_default();

    ctx.model
        .tables
        .iter()
        .map(|t| {
            let columns: Vec<ReportColumn> = ctx
                .model
                .columns_of(&t.name)
                .map(|c| ReportColumn {
                    name: c.name.clone(),
                    data_type: c.data_type.clone(),
                    is_key: c.is_key,
                    is_hidden: c.is_hidden,
                })
                .collect();
            let template = match t.role {
                TableRole::Fact => format!("Fact table holding {} records.", t.name),
                TableRole::Dimension => format!("Dimension table describing {}.", t.name),
            };
            ReportTable {
                name: t.name.clone(),
                role: t.role,
                row_count: t.row_count,
                column_count: columns.len(),
                is_hidden: t.is_hidden,
                description: coalesce([
                    described.get(&t.name.to_lowercase()).cloned(),
                    Some(t.description.clone()),
                    Some(template),
                ]),
                columns,
            }
        })
        .collect()
}

fn lint_findings(draft: &Value, ctx: &PipelineContext) -> Vec<ReportFinding> {
    let mut findings: Vec<ReportFinding> = ctx
        .insights
        .iter()
        .flat_map(|insight| {
            insight.findings.iter().map(|f| ReportFinding {
                measure: insight.name.clone(),
                rule_id: f.rule_id.clone(),
                severity: f.severity,
                message: f.message.clone(),
                example: f.example.clone(),
            })
        })
        .collect();
    let mut seen: HashSet<(String, String)> = findings
        .iter()
        .map(|f| (f.measure.to_lowercase(), f.rule_id.to_lowercase()))
        .collect();

    let generated = array_field(draft, &["lintFindings", "findings"])
        .map(|items| items.iter().filter_map(|item| generated_finding(item, ctx)).collect::<Vec<_>>())
        .unwrap_or_default();
    for finding in generated {
        if seen.insert((finding.measure.to_lowercase(), finding.rule_id.to_lowercase())) {
            findings.push(finding);
        }
    }
    findings
}

/// A generated finding, kept only when it names a known measure and carries
/// a rule id, a message and (if any) a recognizable severity.
fn generated_finding(item: &Value, ctx: &PipelineContext) -> Option<ReportFinding> {
    let measure = str_field(item, &["measure", "measureName"])?;
    let insight = ctx.insight(&measure)?;
    let severity = match str_field(item, &["severity", "level"]) {
        Some(text) => Severity::parse(&text)?,
        None => Severity::Info,
    };
    Some(ReportFinding {
        measure: insight.name.clone(),
        rule_id: str_field(item, &["ruleId", "rule", "id"])?,
        severity,
        message: str_field(item, &["message", "description"])?,
        example: str_field(item, &["example"]),
    })
}

fn glossary(draft: &Value, ctx: &PipelineContext) -> Vec<GlossaryTerm> {
    coalesce([ctx.output(StageId::Glossary).map(terms), Some(terms(draft))])
}

fn architecture(draft: &Value, ctx: &PipelineContext) -> Option<ArchitectureSection> {
    ctx.output(StageId::Architecture)
        .and_then(ArchitectureSection::from_payload)
        .or_else(|| field(draft, &["architecture"]).and_then(ArchitectureSection::from_payload))
}

/// Observations derivable without any generated text.
pub fn default_insights(ctx: &PipelineContext) -> Vec<String> {
    let mut insights = Vec::new();
    let measures = ctx.model.measures.len();

    let flagged = ctx.insights.iter().filter(|i| !i.findings.is_empty()).count();
    if flagged > 0 {
        insights.push(format!(
            "{flagged} of {measures} measures have formula patterns worth reviewing."
        ));
    }

    let summary = &ctx.integrity.summary;
    if summary.unknown_tables + summary.unknown_columns > 0 {
        insights.push(format!(
            "{} relationship references do not resolve to a loaded table or column.",
            summary.unknown_tables + summary.unknown_columns
        ));
    }
    if summary.duplicate_columns > 0 {
        insights.push(format!("{} columns are defined more than once.", summary.duplicate_columns));
    }
    if summary.many_to_many > 0 {
        insights.push(format!(
            "{} many-to-many relationships can inflate totals if filters are not controlled.",
            summary.many_to_many
        ));
    }
    if summary.inactive > 0 {
        insights.push(format!(
            "{} inactive relationships are only used when a measure activates them explicitly.",
            summary.inactive
        ));
    }

    let mut kinds: HashMap<&str, usize> = HashMap::new();
    for insight in ctx.insights.iter() {
        *kinds.entry(insight.description.kind.as_str()).or_default() += 1;
    }
    if let Some((kind, count)) = kinds.into_iter().max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0))) {
        if count * 2 > measures {
            insights.push(format!("Most measures ({count} of {measures}) are {kind} calculations."));
        }
    }

    if insights.is_empty() {
        insights.push("No structural or formula issues were detected.".to_string());
    }
    insights
}

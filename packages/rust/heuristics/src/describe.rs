//! Heuristic measure describer.
//!
//! Derives kind, time window, purpose, usage guidance, success indicators,
//! risks, and dependencies from the measure name and formula text alone.
//! This is the deterministic ground truth every pipeline stage falls back to.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lint::{TIME_INTELLIGENCE, matching_rules};
use crate::scan::{Scanned, scan};

/// Measure classification, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasureKind {
    Percent,
    Ratio,
    Average,
    Count,
    Sum,
    TimeIntelligence,
    Other,
}

impl MeasureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Ratio => "ratio",
            Self::Average => "average",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::TimeIntelligence => "time-intelligence",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heuristic description of one measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureDescription {
    pub kind: MeasureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    pub purpose: String,
    pub when_to_use: String,
    pub success_indicators: Vec<String>,
    pub risks: Vec<String>,
    pub dependencies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Kind classification
// ---------------------------------------------------------------------------

static PERCENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)%|\bpercent(?:age)?\b|\bpct\b|\brate\b|\bshare\b").expect("valid regex")
});
static PERCENT_FORMULA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\*\s*100\b").expect("valid regex"));

static RATIO_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bratio\b|\bper\b").expect("valid regex"));
static DIVISION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDIVIDE\s*\(").expect("valid regex"));

static AVERAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bavg\b|\baverage\b|\bmean\b").expect("valid regex"));
static AVERAGE_FORMULA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAVERAGE[AX]?\s*\(").expect("valid regex"));

static COUNT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcount\b|#|\bnumber of\b|\bno\. of\b").expect("valid regex")
});
static COUNT_FORMULA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:COUNT|COUNTA|COUNTAX|COUNTX|COUNTROWS|COUNTBLANK|DISTINCTCOUNT|DISTINCTCOUNTNOBLANK)\s*\(",
    )
    .expect("valid regex")
});

static SUM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bsum\b").expect("valid regex"));
static SUM_FORMULA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSUMX?\s*\(").expect("valid regex"));

static TIME_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:ytd|qtd|mtd|yoy|mom|qoq|wow|py|ly|prior year|last year|rolling)\b")
        .expect("valid regex")
});

/// Classify a measure. First matching rule wins.
pub fn classify(name: &str, formula: &str) -> MeasureKind {
    classify_scanned(name, &scan(formula))
}

fn classify_scanned(name: &str, s: &Scanned) -> MeasureKind {
    let code = s.code.as_str();

    if PERCENT_NAME.is_match(name) || PERCENT_FORMULA.is_match(code) {
        MeasureKind::Percent
    } else if DIVISION_CALL.is_match(code) || s.operators.contains('/') || RATIO_NAME.is_match(name)
    {
        MeasureKind::Ratio
    } else if AVERAGE_FORMULA.is_match(code) || AVERAGE_NAME.is_match(name) {
        MeasureKind::Average
    } else if COUNT_FORMULA.is_match(code) || COUNT_NAME.is_match(name) {
        MeasureKind::Count
    } else if SUM_FORMULA.is_match(code) || SUM_NAME.is_match(name) {
        MeasureKind::Sum
    } else if TIME_INTELLIGENCE.is_match(code) || TIME_NAME.is_match(name) {
        MeasureKind::TimeIntelligence
    } else {
        MeasureKind::Other
    }
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

static DATES_IN_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bDATESINPERIOD\s*\([^,]*,[^,]*,\s*-\s*(\d+)\s*,\s*(DAY|WEEK|MONTH|QUARTER|YEAR)\s*\)",
    )
    .expect("valid regex")
});

static PERIOD_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:DATEADD|PARALLELPERIOD)\s*\([^,]*,\s*-\s*(\d+)\s*,\s*(DAY|WEEK|MONTH|QUARTER|YEAR)\s*\)",
    )
    .expect("valid regex")
});

static PREVIOUS_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(SAMEPERIODLASTYEAR|PREVIOUSYEAR|PREVIOUSQUARTER|PREVIOUSMONTH|PREVIOUSDAY)\s*\(")
        .expect("valid regex")
});

static TO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:TOTAL|DATES)(YTD|QTD|MTD)\s*\(").expect("valid regex")
});

fn unit_title(unit: &str) -> &'static str {
    match unit.to_ascii_uppercase().as_str() {
        "DAY" => "Day",
        "WEEK" => "Week",
        "MONTH" => "Month",
        "QUARTER" => "Quarter",
        _ => "Year",
    }
}

fn over_period(unit: &str) -> String {
    let unit = unit_title(unit);
    format!("{unit} over {unit}")
}

/// Extract the time window a formula evaluates over, if any.
pub fn extract_window(formula: &str) -> Option<String> {
    window_from_code(&scan(formula).code)
}

fn window_from_code(code: &str) -> Option<String> {
    if let Some(caps) = DATES_IN_PERIOD.captures(code) {
        let n: u64 = caps[1].parse().unwrap_or(1);
        let unit = unit_title(&caps[2]);
        let plural = if n == 1 { "" } else { "s" };
        return Some(format!("Last {n} {unit}{plural}"));
    }

    if let Some(caps) = PERIOD_OFFSET.captures(code) {
        let n: u64 = caps[1].parse().unwrap_or(1);
        let unit = &caps[2];
        return Some(match (n, unit.to_ascii_uppercase().as_str()) {
            (1, _) => over_period(unit),
            (7, "DAY") => over_period("WEEK"),
            (12, "MONTH") | (4, "QUARTER") => over_period("YEAR"),
            (3, "MONTH") => over_period("QUARTER"),
            (n, _) => format!("Prior {n} {}s", unit_title(unit)),
        });
    }

    if let Some(caps) = PREVIOUS_PERIOD.captures(code) {
        let unit = match caps[1].to_ascii_uppercase().as_str() {
            "SAMEPERIODLASTYEAR" | "PREVIOUSYEAR" => "YEAR",
            "PREVIOUSQUARTER" => "QUARTER",
            "PREVIOUSMONTH" => "MONTH",
            _ => "DAY",
        };
        return Some(over_period(unit));
    }

    if let Some(caps) = TO_DATE.captures(code) {
        let label = match caps[1].to_ascii_uppercase().as_str() {
            "YTD" => "Year to Date",
            "QTD" => "Quarter to Date",
            _ => "Month to Date",
        };
        return Some(label.to_string());
    }

    None
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

static QUALIFIED_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"('(?:[^']|'')+'|[A-Za-z_][A-Za-z0-9_]*)\[([^\]]+)\]").expect("valid regex")
});

static BRACKET_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("valid regex"));

/// Extract `Table[Column]` and bare `[Name]` references, de-duplicated
/// case-insensitively in first-seen order.
pub fn extract_dependencies(formula: &str) -> Vec<String> {
    dependencies_from_code(&scan(formula).code)
}

fn dependencies_from_code(code: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut deps = Vec::new();
    let mut push = |dep: String| {
        if seen.insert(dep.to_lowercase()) {
            deps.push(dep);
        }
    };

    for caps in QUALIFIED_REF.captures_iter(code) {
        let table = caps[1].trim_matches('\'').replace("''", "'");
        push(format!("{table}[{}]", caps[2].trim()));
    }

    for m in BRACKET_REF.find_iter(code) {
        let qualified = code[..m.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c == '\'' || c == '_' || c.is_ascii_alphanumeric());
        if qualified {
            continue;
        }
        let name = m.as_str()[1..m.as_str().len() - 1].trim();
        if name.is_empty() || name.eq_ignore_ascii_case("measures") {
            continue;
        }
        push(format!("[{name}]"));
    }

    deps
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

fn window_suffix(window: Option<&str>) -> String {
    window.map(|w| format!(" ({w})")).unwrap_or_default()
}

fn purpose_for(kind: MeasureKind, subject: &str, window: Option<&str>) -> String {
    let w = window_suffix(window);
    match kind {
        MeasureKind::Percent => format!(
            "Expresses {subject}{w} as a percentage so performance can be compared across segments of different size."
        ),
        MeasureKind::Ratio => format!(
            "Relates two quantities for {subject}{w} to show efficiency rather than raw volume."
        ),
        MeasureKind::Average => format!(
            "Shows the typical value of {subject}{w}, smoothing out differences in volume."
        ),
        MeasureKind::Count => format!("Counts {subject}{w} to track activity volume."),
        MeasureKind::Sum => format!("Totals {subject}{w} to show overall volume or value."),
        MeasureKind::TimeIntelligence => format!(
            "Tracks {subject}{w} over time to expose trends and period-over-period change."
        ),
        MeasureKind::Other => format!("Calculates {subject}{w} for reporting and analysis."),
    }
}

fn when_to_use_for(kind: MeasureKind, window: Option<&str>) -> String {
    let base = match kind {
        MeasureKind::Percent => {
            "Use when comparing proportions across categories, regions, or periods of different size."
        }
        MeasureKind::Ratio => {
            "Use when judging efficiency or yield, e.g. output per unit of input."
        }
        MeasureKind::Average => {
            "Use when the typical case matters more than the total, e.g. basket size or handling time."
        }
        MeasureKind::Count => {
            "Use when monitoring activity levels, capacity, or adoption."
        }
        MeasureKind::Sum => {
            "Use for headline totals and for breaking volume down by dimension."
        }
        MeasureKind::TimeIntelligence => {
            "Use in trend visuals and period comparisons with a date axis."
        }
        MeasureKind::Other => "Use where this specific business calculation is required.",
    };
    match window {
        Some(w) => format!("{base} Evaluated over: {w}."),
        None => base.to_string(),
    }
}

fn success_indicators_for(kind: MeasureKind, window: Option<&str>) -> Vec<String> {
    let mut indicators: Vec<String> = match kind {
        MeasureKind::Percent => vec![
            "Value stays within the expected 0-100% band".into(),
            "Movement against target or prior period is in the desired direction".into(),
        ],
        MeasureKind::Ratio => vec![
            "Ratio improves against the prior period".into(),
            "Denominator is non-zero for all reported segments".into(),
        ],
        MeasureKind::Average => vec![
            "Average trends toward the target value".into(),
            "Variance between segments narrows over time".into(),
        ],
        MeasureKind::Count => vec![
            "Count grows in line with plan".into(),
            "No unexpected drops between consecutive periods".into(),
        ],
        MeasureKind::Sum => vec![
            "Total meets or exceeds target".into(),
            "Breakdown by dimension reconciles to the grand total".into(),
        ],
        MeasureKind::TimeIntelligence => vec![
            "Period-over-period change is positive or within tolerance".into(),
            "Trend line is stable without unexplained spikes".into(),
        ],
        MeasureKind::Other => vec!["Value is consistent with source-system reports".into()],
    };
    if let Some(w) = window {
        indicators.push(format!("Comparison window ({w}) is populated for the latest period"));
    }
    indicators
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Describe a measure from its name and formula. Always succeeds.
pub fn describe(name: &str, formula: &str) -> MeasureDescription {
    let scanned = scan(formula);
    let kind = classify_scanned(name, &scanned);
    let window = window_from_code(&scanned.code);
    let subject = match name.trim() {
        "" => "this measure".to_string(),
        trimmed => trimmed.to_string(),
    };

    let mut risks: Vec<String> = matching_rules(&scanned).map(|r| r.risk.to_string()).collect();
    if scanned.is_blank() {
        risks.push("Formula text is empty; the measure cannot be evaluated.".to_string());
    }

    MeasureDescription {
        kind,
        purpose: purpose_for(kind, &subject, window.as_deref()),
        when_to_use: when_to_use_for(kind, window.as_deref()),
        success_indicators: success_indicators_for(kind, window.as_deref()),
        risks,
        dependencies: dependencies_from_code(&scanned.code),
        window,
    }
}

static CURRENCY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sales|revenue|cost|costs|price|profit|amount|spend|income|expense|expenses|value|budget|margin)\b")
        .expect("valid regex")
});

/// Infer a display format string for a measure with none exported.
pub fn infer_format_string(name: &str, formula: &str) -> &'static str {
    match classify(name, formula) {
        MeasureKind::Percent => "0.0%",
        MeasureKind::Count => "#,0",
        _ if CURRENCY_NAME.is_match(name) => "$#,0.00",
        _ => "#,0.00",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_measure() {
        let d = describe("Total Sales", "SUM(Sales[Amount])");
        assert_eq!(d.kind, MeasureKind::Sum);
        assert_eq!(d.window, None);
        assert!(d.risks.is_empty());
        assert_eq!(d.dependencies, vec!["Sales[Amount]"]);
        assert!(d.purpose.contains("Total Sales"));
    }

    #[test]
    fn percent_sign_inside_a_string_literal_is_ignored() {
        assert_eq!(
            classify("Sales Label", r#"FORMAT(SUM(Sales[Amount]), "0%")"#),
            MeasureKind::Sum
        );
        assert_eq!(classify("Share", "DIVIDE([A], [B]) * 100"), MeasureKind::Percent);
    }

    #[test]
    fn percent_beats_ratio() {
        let d = describe("Margin %", "DIVIDE([Profit],[Revenue])*100");
        assert_eq!(d.kind, MeasureKind::Percent);
        assert!(d.risks.is_empty());
        assert_eq!(d.dependencies, vec!["[Profit]", "[Revenue]"]);
        assert_eq!(infer_format_string("Margin %", "DIVIDE([Profit],[Revenue])*100"), "0.0%");
    }

    #[test]
    fn raw_division_is_ratio_with_risk() {
        let d = describe("Bad Ratio", "[Profit]/[Revenue]");
        assert_eq!(d.kind, MeasureKind::Ratio);
        assert_eq!(d.risks.len(), 1);
        assert!(d.risks[0].contains("division"));
    }

    #[test]
    fn classification_precedence() {
        assert_eq!(classify("Avg Order", "AVERAGE(Sales[Amount])"), MeasureKind::Average);
        assert_eq!(classify("Orders", "COUNTROWS(Sales)"), MeasureKind::Count);
        assert_eq!(classify("Order Count", "SUM(Sales[Qty])"), MeasureKind::Count);
        assert_eq!(
            classify("Sales LY", "CALCULATE([Sales], SAMEPERIODLASTYEAR('Date'[Date]))"),
            MeasureKind::TimeIntelligence
        );
        assert_eq!(classify("Flag", "1"), MeasureKind::Other);
        assert_eq!(
            classify("Avg per Customer", "DIVIDE([Sales], [Customers])"),
            MeasureKind::Ratio
        );
    }

    #[test]
    fn windows() {
        assert_eq!(
            extract_window("CALCULATE([Sales], DATESINPERIOD('Date'[Date], MAX('Date'[Date]), -12, MONTH))"),
            Some("Last 12 Months".into())
        );
        assert_eq!(
            extract_window("CALCULATE([Sales], DATESINPERIOD('Date'[Date], LASTDATE('Date'[Date]), -1, year))"),
            Some("Last 1 Year".into())
        );
        assert_eq!(
            extract_window("CALCULATE([Sales], SAMEPERIODLASTYEAR('Date'[Date]))"),
            Some("Year over Year".into())
        );
        assert_eq!(
            extract_window("CALCULATE([Sales], DATEADD('Date'[Date], -1, YEAR))"),
            Some("Year over Year".into())
        );
        assert_eq!(
            extract_window("CALCULATE([Sales], DATEADD('Date'[Date], -1, MONTH))"),
            Some("Month over Month".into())
        );
        assert_eq!(
            extract_window("CALCULATE([Sales], DATEADD('Date'[Date], -7, DAY))"),
            Some("Week over Week".into())
        );
        assert_eq!(
            extract_window("TOTALYTD([Sales], 'Date'[Date])"),
            Some("Year to Date".into())
        );
        assert_eq!(extract_window("SUM(Sales[Amount])"), None);
    }

    #[test]
    fn dependencies_skip_measures_table_and_dedupe() {
        let deps = extract_dependencies(
            "SUMX('Sales Line', 'Sales Line'[Qty] * [Price]) + [price] + [Measures] + Sales[Qty] + SALES[qty]",
        );
        assert_eq!(deps, vec!["Sales Line[Qty]", "Sales[Qty]", "[Price]"]);
    }

    #[test]
    fn dependencies_ignore_strings_and_comments() {
        let deps = extract_dependencies("IF([A] > 0, \"[NotARef]\") // [AlsoNot]");
        assert_eq!(deps, vec!["[A]"]);
    }

    #[test]
    fn empty_and_adversarial_inputs() {
        let d = describe("", "");
        assert_eq!(d.kind, MeasureKind::Other);
        assert!(d.purpose.contains("this measure"));
        assert_eq!(d.risks.len(), 1);

        for formula in ["   ", "[[[[", "']'", "DATESINPERIOD(,,-,MONTH)", "\"", "/*", "[]"] {
            let d = describe("x", formula);
            assert!(!d.purpose.is_empty());
            assert!(!d.when_to_use.is_empty());
            assert!(!d.success_indicators.is_empty());
        }
    }

    #[test]
    fn format_inference() {
        assert_eq!(infer_format_string("Order Count", "COUNTROWS(Orders)"), "#,0");
        assert_eq!(infer_format_string("Total Sales", "SUM(Sales[Amount])"), "$#,0.00");
        assert_eq!(infer_format_string("Units", "SUM(Sales[Qty])"), "#,0.00");
        assert_eq!(infer_format_string("Conversion Rate", "DIVIDE([a],[b])"), "0.0%");
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&MeasureKind::TimeIntelligence).expect("serialize");
        assert_eq!(json, r#""time-intelligence""#);
    }
}

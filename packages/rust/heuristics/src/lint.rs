//! Pattern linter for measure formulas.
//!
//! Six independent rules run over the scanned formula. Each rule yields at
//! most one [`Finding`]; no rule short-circuits another.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::scan::{Scanned, scan};

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Lenient parse used when reading generated findings back in.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" | "low" | "note" => Some(Self::Info),
            "warn" | "warning" | "medium" => Some(Self::Warn),
            "error" | "high" | "critical" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One lint result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

/// A lint rule definition.
pub struct Rule {
    pub id: &'static str,
    pub severity: Severity,
    pub message: &'static str,
    /// Short risk phrasing reused by the describer.
    pub risk: &'static str,
    pub example: Option<&'static str>,
    check: fn(&Scanned) -> bool,
}

impl Rule {
    fn finding(&self) -> Finding {
        Finding {
            rule_id: self.id.to_string(),
            severity: self.severity,
            message: self.message.to_string(),
            example: self.example.map(String::from),
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static DIVIDE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDIVIDE\s*\(").expect("valid regex"));

static AVERAGEX_OVER_MEASURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bAVERAGEX\s*\([^,]*,\s*\[").expect("valid regex")
});

static COUNT_ALL_TRUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:COUNTX|COUNTAX|FILTER|CALCULATE)\s*\([^,]*,\s*TRUE\s*(?:\(\s*\))?\s*\)")
        .expect("valid regex")
});

pub(crate) static TIME_INTELLIGENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:TOTALYTD|TOTALQTD|TOTALMTD|DATESYTD|DATESQTD|DATESMTD|SAMEPERIODLASTYEAR|DATEADD|DATESINPERIOD|DATESBETWEEN|PARALLELPERIOD|PREVIOUS(?:DAY|MONTH|QUARTER|YEAR)|NEXT(?:DAY|MONTH|QUARTER|YEAR)|STARTOF(?:MONTH|QUARTER|YEAR)|ENDOF(?:MONTH|QUARTER|YEAR))\s*\(",
    )
    .expect("valid regex")
});

static MAX_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bMAXX?\s*\(").expect("valid regex"));

static CALENDAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:date|dates|calendar|dimdate|dim_date|dim date|date table)\b'?\[")
        .expect("valid regex")
});

static CROSS_TABLE_LOOKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:RELATED|RELATEDTABLE|LOOKUPVALUE)\s*\(").expect("valid regex")
});

static CONDITIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:IF|SWITCH)\s*\(").expect("valid regex"));

static GUARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:ISBLANK|ISEMPTY|HASONEVALUE|HASONEFILTER|ISFILTERED|ISCROSSFILTERED|ISINSCOPE|SELECTEDVALUE|COALESCE|IFERROR|ISERROR|BLANK)\s*\(",
    )
    .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Bare `/` without a DIVIDE() wrapper anywhere in the formula.
pub fn has_unsafe_division(s: &Scanned) -> bool {
    s.operators.contains('/') && !DIVIDE_CALL.is_match(&s.code)
}

fn iterates_over_measure(s: &Scanned) -> bool {
    AVERAGEX_OVER_MEASURE.is_match(&s.code)
}

fn counts_all_via_true(s: &Scanned) -> bool {
    COUNT_ALL_TRUE.is_match(&s.code)
}

fn time_intelligence_max_anchor(s: &Scanned) -> bool {
    TIME_INTELLIGENCE.is_match(&s.code)
        && MAX_CALL.is_match(&s.code)
        && !CALENDAR_REF.is_match(&s.code)
}

fn cross_table_lookup(s: &Scanned) -> bool {
    CROSS_TABLE_LOOKUP.is_match(&s.code)
}

fn conditional_without_guard(s: &Scanned) -> bool {
    CONDITIONAL.is_match(&s.code) && !GUARD.is_match(&s.code)
}

/// All rules, in reporting order.
pub static RULES: [Rule; 6] = [
    Rule {
        id: "division-without-divide",
        severity: Severity::Warn,
        message: "Division uses the `/` operator without DIVIDE(); a zero or blank denominator raises an error instead of returning blank.",
        risk: "Raw division can fail or return infinity when the denominator is zero or blank.",
        example: Some("DIVIDE([Numerator], [Denominator])"),
        check: has_unsafe_division,
    },
    Rule {
        id: "iteration-over-measure",
        severity: Severity::Info,
        message: "AVERAGEX iterates a measure, forcing a context transition per row; results depend on the granularity of the iterated table.",
        risk: "Averaging over a measure is sensitive to the iterated table's granularity and can be slow.",
        example: Some("AVERAGEX(VALUES('Date'[Month]), [Sales])"),
        check: iterates_over_measure,
    },
    Rule {
        id: "count-all-via-true",
        severity: Severity::Warn,
        message: "A TRUE() filter counts every row regardless of context; use COUNTROWS(Table) or an explicit filter.",
        risk: "Counting via TRUE() ignores intended filters and may over-count.",
        example: Some("COUNTROWS('Sales')"),
        check: counts_all_via_true,
    },
    Rule {
        id: "time-intelligence-max-anchor",
        severity: Severity::Warn,
        message: "Time intelligence is anchored on MAX() without a reference to a marked date table; results shift with the filter context.",
        risk: "Time window anchored on MAX() without an explicit calendar table may drift with filters.",
        example: Some("DATESINPERIOD('Date'[Date], MAX('Date'[Date]), -12, MONTH)"),
        check: time_intelligence_max_anchor,
    },
    Rule {
        id: "cross-table-lookup-in-measure",
        severity: Severity::Warn,
        message: "RELATED/LOOKUPVALUE inside a measure depends on row context and relationship paths that may not exist in every visual.",
        risk: "Cross-table lookups depend on row context and relationship paths.",
        example: Some("SUMX('Sales', 'Sales'[Qty] * RELATED('Product'[Price]))"),
        check: cross_table_lookup,
    },
    Rule {
        id: "conditional-without-guard",
        severity: Severity::Info,
        message: "Conditional logic has no blank or selection guard (ISBLANK, HASONEVALUE, SELECTEDVALUE, ...); totals and empty selections may behave unexpectedly.",
        risk: "Conditional branches without blank/selection guards can misbehave on totals or empty selections.",
        example: Some("IF(HASONEVALUE('Product'[Category]), [Sales])"),
        check: conditional_without_guard,
    },
];

/// Lint a formula. Never panics; empty or malformed input yields no findings.
pub fn lint(formula: &str) -> Vec<Finding> {
    lint_scanned(&scan(formula))
}

/// Lint an already-scanned formula.
pub fn lint_scanned(scanned: &Scanned) -> Vec<Finding> {
    matching_rules(scanned).map(Rule::finding).collect()
}

/// Rules that fire for a scanned formula.
pub fn matching_rules(scanned: &Scanned) -> impl Iterator<Item = &'static Rule> + '_ {
    RULES.iter().filter(move |rule| (rule.check)(scanned))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_ids(formula: &str) -> Vec<String> {
        lint(formula).into_iter().map(|f| f.rule_id).collect()
    }

    #[test]
    fn clean_sum_has_no_findings() {
        assert!(lint("SUM(Sales[Amount])").is_empty());
    }

    #[test]
    fn divide_wrapper_suppresses_division_rule() {
        assert!(lint("DIVIDE([Profit],[Revenue])*100").is_empty());
    }

    #[test]
    fn raw_division_is_flagged() {
        let findings = lint("[Profit]/[Revenue]");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "division-without-divide");
        assert_eq!(findings[0].severity, Severity::Warn);
        assert!(findings[0].example.is_some());
    }

    #[test]
    fn division_in_comment_or_string_is_ignored() {
        assert!(lint("SUM(Sales[Amount]) // per unit / day").is_empty());
        assert!(lint(r#"FORMAT([x], "a/b")"#).is_empty());
    }

    #[test]
    fn averagex_over_measure() {
        assert_eq!(
            rule_ids("AVERAGEX(VALUES('Date'[Month]), [Sales])"),
            vec!["iteration-over-measure"]
        );
        assert!(lint("AVERAGEX(Sales, Sales[Qty] * Sales[Price])").is_empty());
    }

    #[test]
    fn count_via_true() {
        assert_eq!(
            rule_ids("COUNTROWS(FILTER(Sales, TRUE()))"),
            vec!["count-all-via-true"]
        );
        assert_eq!(rule_ids("COUNTX(Sales, TRUE)"), vec!["count-all-via-true"]);
    }

    #[test]
    fn time_intelligence_anchor() {
        assert_eq!(
            rule_ids("CALCULATE([Sales], DATESINPERIOD(Sales[OrderDate], MAX(Sales[OrderDate]), -30, DAY))"),
            vec!["time-intelligence-max-anchor"]
        );
        assert!(
            lint("CALCULATE([Sales], DATESINPERIOD('Date'[Date], MAX('Date'[Date]), -30, DAY))")
                .is_empty()
        );
    }

    #[test]
    fn related_lookup() {
        assert_eq!(
            rule_ids("SUMX(Sales, Sales[Qty] * RELATED(Product[Price]))"),
            vec!["cross-table-lookup-in-measure"]
        );
    }

    #[test]
    fn conditional_guard() {
        assert_eq!(
            rule_ids("IF([Sales] > 0, [Profit], 0)"),
            vec!["conditional-without-guard"]
        );
        assert!(lint("IF(ISBLANK([Sales]), 0, [Profit])").is_empty());
        assert!(lint("IFERROR([a], 0)").is_empty());
    }

    #[test]
    fn rules_fire_independently() {
        let ids = rule_ids("IF([a] > 0, RELATED(T[x]) / [b])");
        assert_eq!(
            ids,
            vec![
                "division-without-divide",
                "cross-table-lookup-in-measure",
                "conditional-without-guard"
            ]
        );
    }

    #[test]
    fn adversarial_input_never_panics() {
        let inputs = [
            "",
            "   ",
            "((((((",
            "]]]][[[[",
            "\"\"\"\"\"",
            "'''''",
            "/",
            "DIVIDE(",
            "IF(",
            "\u{0}\u{ffff}",
            "AVERAGEX(,[",
        ];
        for input in inputs {
            let findings = lint(input);
            assert!(findings.len() <= RULES.len());
        }
        assert_eq!(rule_ids("/"), vec!["division-without-divide"]);
    }

    #[test]
    fn severity_parse_is_lenient() {
        assert_eq!(Severity::parse("WARNING"), Some(Severity::Warn));
        assert_eq!(Severity::parse("high"), Some(Severity::Error));
        assert_eq!(Severity::parse("bogus"), None);
    }
}

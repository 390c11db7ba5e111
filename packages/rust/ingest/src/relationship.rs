//! Relationship definition parsing.
//!
//! Exports describe relationships either as one definition string such as
//! `'Sales'[CustomerID] *-1 'Customer'[ID]` or as discrete from/to fields.
//! Both shapes, plus the many spellings of cardinality and filter direction,
//! are folded into [`Relationship`] here.

use std::sync::LazyLock;

use modeldoc_shared::{Cardinality, Direction};
use regex::Regex;

/// `'Table'[Column] <card> [arrow] <card> 'Table'[Column]`, table quotes optional.
static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:'((?:[^']|'')+)'|([^\s\['\]]+))\s*\[([^\]]+)\]\s*([*1])\s*\[?\s*(<->|<-|->|-{1,2}|↔|←|→)?\s*\]?\s*([*1])\s*(?:'((?:[^']|'')+)'|([^\s\['\]]+))\s*\[([^\]]+)\]",
    )
    .expect("valid regex")
});

static BOTH_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bboth\b").expect("valid regex"));

static INACTIVE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\binactive\b").expect("valid regex"));

/// A relationship definition parsed from a single string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDefinition {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality: Cardinality,
    pub direction: Direction,
    /// `false` when the text marks the relationship inactive.
    pub active: bool,
}

fn unescape_table(quoted: Option<regex::Match<'_>>, bare: Option<regex::Match<'_>>) -> Option<String> {
    quoted
        .map(|m| m.as_str().replace("''", "'"))
        .or_else(|| bare.map(|m| m.as_str().to_string()))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn cardinality_from_marks(from: &str, to: &str) -> Cardinality {
    match (from, to) {
        ("*", "1") => Cardinality::ManyToOne,
        ("1", "*") => Cardinality::OneToMany,
        ("1", "1") => Cardinality::OneToOne,
        _ => Cardinality::ManyToMany,
    }
}

/// Parse a one-string relationship definition. Returns `None` when the text
/// does not have the `Table[Column] card-card Table[Column]` shape.
pub fn parse_definition(text: &str) -> Option<ParsedDefinition> {
    let caps = DEFINITION.captures(text)?;
    let from_table = unescape_table(caps.get(1), caps.get(2))?;
    let to_table = unescape_table(caps.get(7), caps.get(8))?;
    let from_column = caps.get(3)?.as_str().trim().to_string();
    let to_column = caps.get(9)?.as_str().trim().to_string();
    if from_column.is_empty() || to_column.is_empty() {
        return None;
    }

    let cardinality = cardinality_from_marks(caps.get(4)?.as_str(), caps.get(6)?.as_str());
    let arrow = caps.get(5).map(|m| m.as_str()).unwrap_or("");
    let tail = &text[caps.get(0).map_or(0, |m| m.end())..];
    let direction = if matches!(arrow, "<->" | "↔") || BOTH_WORD.is_match(tail) {
        Direction::Both
    } else {
        Direction::Single
    };

    Some(ParsedDefinition {
        from_table,
        from_column,
        to_table,
        to_column,
        cardinality,
        direction,
        active: !INACTIVE_WORD.is_match(text),
    })
}

/// Parse any of the accepted cardinality spellings: `Many-to-One`,
/// `ManyToOne`, `many_to_one`, `*:1`, `M:1`, `N:1`, and their mirrors.
pub fn parse_cardinality(value: &str) -> Option<Cardinality> {
    let compact: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '*')
        .flat_map(char::to_lowercase)
        .collect();
    match compact.as_str() {
        "manytoone" | "m1" | "n1" | "*1" => Some(Cardinality::ManyToOne),
        "onetomany" | "1m" | "1n" | "1*" => Some(Cardinality::OneToMany),
        "onetoone" | "11" => Some(Cardinality::OneToOne),
        "manytomany" | "mm" | "nn" | "mn" | "nm" | "**" => Some(Cardinality::ManyToMany),
        _ => None,
    }
}

fn side_is_many(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "many" | "*" | "m" | "n" => Some(true),
        "one" | "1" => Some(false),
        _ => None,
    }
}

/// Combine separate from/to cardinality cells (`Many` + `One` etc.).
pub fn cardinality_from_sides(from: &str, to: &str) -> Option<Cardinality> {
    let card = match (side_is_many(from)?, side_is_many(to)?) {
        (true, false) => Cardinality::ManyToOne,
        (false, true) => Cardinality::OneToMany,
        (false, false) => Cardinality::OneToOne,
        (true, true) => Cardinality::ManyToMany,
    };
    Some(card)
}

/// Parse a cross-filter direction, including the `CrossFilteringBehavior`
/// values `BothDirections`, `OneDirection` and `Automatic`.
pub fn parse_direction(value: &str) -> Option<Direction> {
    let compact: String = value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .flat_map(char::to_lowercase)
        .collect();
    match compact.as_str() {
        "both" | "bothdirections" | "bidirectional" | "bi" | "2" => Some(Direction::Both),
        "single" | "singledirection" | "onedirection" | "one" | "automatic" | "1" => {
            Some(Direction::Single)
        }
        _ => None,
    }
}

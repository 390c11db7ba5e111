//! Accepted header synonyms per canonical field.
//!
//! Every "any-shape CSV" tolerance lives here: each field declares an ordered
//! list of header names, and [`lookup`] is the only place rows are read from.

/// A raw CSV row: `(header, cell)` pairs in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow(Vec<(String, String)>);

impl RawRow {
    /// Cell under an exact header name; the first such header wins.
    pub fn get(&self, header: &str) -> Option<&String> {
        self.0.iter().find(|(key, _)| key == header).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter().map(|(key, value)| (key, value))
    }
}

impl FromIterator<(String, String)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A canonical field and the header names accepted for it, in priority order.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub candidates: &'static [&'static str],
}

/// Measure export fields.
pub mod measure {
    use super::Field;

    pub const NAME: Field = Field {
        name: "name",
        candidates: &["Name", "name", "MeasureName", "Measure Name", "Measure", "measure_name", "measureName"],
    };
    pub const EXPRESSION: Field = Field {
        name: "expression",
        candidates: &["Expression", "expression", "Formula", "DAX", "Dax", "DAX Expression", "Definition", "measure_expression"],
    };
    pub const DISPLAY_FOLDER: Field = Field {
        name: "displayFolder",
        candidates: &["DisplayFolder", "Display Folder", "displayFolder", "display_folder", "Folder"],
    };
    pub const DESCRIPTION: Field = Field {
        name: "description",
        candidates: &["Description", "description", "Desc", "Comment"],
    };
    pub const TABLE: Field = Field {
        name: "tableName",
        candidates: &["TableName", "Table Name", "tableName", "table_name", "Table", "HomeTable", "Home Table", "Parent"],
    };
    pub const FORMAT_STRING: Field = Field {
        name: "formatString",
        candidates: &["FormatString", "Format String", "formatString", "format_string", "Format"],
    };
}

/// Table export fields.
pub mod table {
    use super::Field;

    pub const NAME: Field = Field {
        name: "name",
        candidates: &["Name", "name", "TableName", "Table Name", "Table", "tableName", "table_name"],
    };
    pub const ROW_COUNT: Field = Field {
        name: "rowCount",
        candidates: &["RowCount", "Row Count", "rowCount", "row_count", "Rows", "RowsCount", "Cardinality"],
    };
    pub const DESCRIPTION: Field = Field {
        name: "description",
        candidates: &["Description", "description", "Desc", "Comment"],
    };
    pub const IS_HIDDEN: Field = Field {
        name: "isHidden",
        candidates: &["IsHidden", "Is Hidden", "isHidden", "is_hidden", "Hidden"],
    };
    pub const ROLE: Field = Field {
        name: "role",
        candidates: &["Role", "role", "TableRole", "Table Role", "TableType", "Table Type"],
    };
}

/// Column export fields.
pub mod column {
    use super::Field;

    pub const TABLE: Field = Field {
        name: "tableName",
        candidates: &["TableName", "Table Name", "tableName", "table_name", "Table"],
    };
    pub const NAME: Field = Field {
        name: "name",
        candidates: &["ColumnName", "Column Name", "columnName", "column_name", "Name", "name", "Column", "ExplicitName"],
    };
    pub const DATA_TYPE: Field = Field {
        name: "dataType",
        candidates: &["DataType", "Data Type", "dataType", "data_type", "Type", "ExplicitDataType"],
    };
    pub const IS_KEY: Field = Field {
        name: "isKey",
        candidates: &["IsKey", "Is Key", "isKey", "is_key", "Key"],
    };
    pub const IS_HIDDEN: Field = Field {
        name: "isHidden",
        candidates: &["IsHidden", "Is Hidden", "isHidden", "is_hidden", "Hidden"],
    };
    pub const DESCRIPTION: Field = Field {
        name: "description",
        candidates: &["Description", "description", "Desc", "Comment"],
    };
    pub const FORMAT_STRING: Field = Field {
        name: "formatString",
        candidates: &["FormatString", "Format String", "formatString", "format_string", "Format"],
    };
}

/// Relationship export fields.
pub mod relationship {
    use super::Field;

    pub const DEFINITION: Field = Field {
        name: "definition",
        candidates: &["Relationship", "relationship", "Definition", "Expression", "RelationshipDefinition", "Relationship Definition"],
    };
    pub const FROM_TABLE: Field = Field {
        name: "fromTable",
        candidates: &["FromTable", "From Table", "fromTable", "from_table", "FromTableName", "From Table Name"],
    };
    pub const FROM_COLUMN: Field = Field {
        name: "fromColumn",
        candidates: &["FromColumn", "From Column", "fromColumn", "from_column", "FromColumnName", "From Column Name"],
    };
    pub const TO_TABLE: Field = Field {
        name: "toTable",
        candidates: &["ToTable", "To Table", "toTable", "to_table", "ToTableName", "To Table Name"],
    };
    pub const TO_COLUMN: Field = Field {
        name: "toColumn",
        candidates: &["ToColumn", "To Column", "toColumn", "to_column", "ToColumnName", "To Column Name"],
    };
    pub const CARDINALITY: Field = Field {
        name: "cardinality",
        candidates: &["Cardinality", "cardinality", "RelationshipType", "Relationship Type", "Multiplicity"],
    };
    pub const FROM_CARDINALITY: Field = Field {
        name: "fromCardinality",
        candidates: &["FromCardinality", "From Cardinality", "fromCardinality", "from_cardinality"],
    };
    pub const TO_CARDINALITY: Field = Field {
        name: "toCardinality",
        candidates: &["ToCardinality", "To Cardinality", "toCardinality", "to_cardinality"],
    };
    pub const DIRECTION: Field = Field {
        name: "direction",
        candidates: &["CrossFilteringBehavior", "Cross Filtering Behavior", "CrossFilterDirection", "Cross Filter Direction", "crossFilteringBehavior", "Direction", "direction", "Filter Direction"],
    };
    pub const ACTIVE: Field = Field {
        name: "active",
        candidates: &["IsActive", "Is Active", "isActive", "is_active", "Active", "active"],
    };
}

/// Trim a cell and remove one wrapping quote pair left over from CSV
/// escaping. The pair is only removed when the inner text holds no unescaped
/// quote, so formula string literals like `"a" & "b"` survive intact.
pub fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = &trimmed[1..trimmed.len() - 1];
        if !has_unescaped_quote(inner) {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn has_unescaped_quote(text: &str) -> bool {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                return true;
            }
        }
    }
    false
}

fn normalize_key(key: &str) -> String {
    key.trim_start_matches('\u{feff}')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .flat_map(char::to_lowercase)
        .collect()
}

/// Read a field from a row: the first candidate header with a non-empty
/// cleaned value wins. Exact header matches are tried before
/// case/punctuation-insensitive ones.
pub fn lookup(row: &RawRow, field: &Field) -> Option<String> {
    for candidate in field.candidates {
        if let Some(value) = row.get(*candidate) {
            let value = clean_value(value);
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    for candidate in field.candidates {
        let wanted = normalize_key(candidate);
        let hit = row
            .iter()
            .filter(|(key, _)| normalize_key(key) == wanted)
            .map(|(_, value)| clean_value(value))
            .find(|value| !value.is_empty());
        if hit.is_some() {
            return hit;
        }
    }

    None
}

/// Lenient boolean parse; `None` when the cell is not recognisably boolean.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "x" | "t" => Some(true),
        "false" | "no" | "n" | "0" | "f" => Some(false),
        _ => None,
    }
}

/// Lenient count parse: tolerates thousands separators and decimals.
pub fn parse_count(value: &str) -> Option<u64> {
    let compact: String = value
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' ' | '\u{a0}'))
        .collect();
    compact.parse::<u64>().ok().or_else(|| {
        compact
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn compact_match_follows_header_order() {
        let field = Field {
            name: "tableName",
            candidates: &["TableName"],
        };
        let first = row(&[("table name", "Sales"), ("TABLE_NAME", "Budget")]);
        assert_eq!(lookup(&first, &field).as_deref(), Some("Sales"));
        let swapped = row(&[("TABLE_NAME", "Budget"), ("table name", "Sales")]);
        assert_eq!(lookup(&swapped, &field).as_deref(), Some("Budget"));
    }

    #[test]
    fn first_non_empty_candidate_wins() {
        let r = row(&[("Name", "  "), ("MeasureName", "Total Sales"), ("Measure", "Other")]);
        assert_eq!(lookup(&r, &measure::NAME), Some("Total Sales".into()));
    }

    #[test]
    fn falls_back_to_case_insensitive_headers() {
        let r = row(&[("\u{feff}MEASURE_NAME", "Total Sales"), ("display folder", "KPIs")]);
        assert_eq!(lookup(&r, &measure::NAME), Some("Total Sales".into()));
        assert_eq!(lookup(&r, &measure::DISPLAY_FOLDER), Some("KPIs".into()));
        assert_eq!(lookup(&r, &measure::DESCRIPTION), None);
    }

    #[test]
    fn clean_value_unwraps_only_safe_quotes() {
        assert_eq!(clean_value(r#"  "Total Sales"  "#), "Total Sales");
        assert_eq!(clean_value(r#""He said ""hi""""#), r#"He said ""hi"""#);
        assert_eq!(clean_value(r#""a" & "b""#), r#""a" & "b""#);
        assert_eq!(clean_value(r#"IF([x], "yes", "no")"#), r#"IF([x], "yes", "no")"#);
        assert_eq!(clean_value("\""), "\"");
    }

    #[test]
    fn clean_value_is_idempotent() {
        for input in [r#""x""#, r#""""x""""#, r#""a" & "b""#, "plain", r#""  padded ""#] {
            let once = clean_value(input);
            assert_eq!(clean_value(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn booleans_and_counts() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_count("50,000"), Some(50_000));
        assert_eq!(parse_count("1234.0"), Some(1234));
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(parse_count("-5"), None);
    }
}

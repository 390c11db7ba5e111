//! Lenient field access over generated JSON.
//!
//! Generated payloads spell keys in camelCase, snake_case or Title Case and
//! put lists where strings belong (and the reverse). These helpers read a
//! field under any of its spellings and coerce it into the shape wanted, or
//! report it absent.

use serde_json::Value;

fn compact(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .flat_map(char::to_lowercase)
        .collect()
}

/// Look up a field by any spelling of `keys`.
pub fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let object = value.as_object()?;
    for key in keys {
        if let Some(found) = object.get(*key) {
            return Some(found);
        }
    }
    let wanted: Vec<String> = keys.iter().map(|k| compact(k)).collect();
    object
        .iter()
        .find(|(k, _)| wanted.contains(&compact(k)))
        .map(|(_, v)| v)
}

/// A non-blank string field. Numbers and booleans are stringified.
pub fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    let text = match field(value, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// A list of non-blank strings. A single string is split on newlines and
/// semicolons; array items that are objects contribute their `name`/`text`.
pub fn str_list(value: &Value, keys: &[&str]) -> Option<Vec<String>> {
    let items: Vec<String> = match field(value, keys)? {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(_) => str_field(item, &["name", "text", "value", "title"]),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(['\n', ';'])
            .map(|part| part.trim().trim_start_matches(['-', '*', '•']).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => return None,
    };
    (!items.is_empty()).then_some(items)
}

/// An array field; `None` when absent or not an array.
pub fn array_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    field(value, keys)?.as_array()
}

/// A numeric field; numeric strings (including `"85%"`) are accepted.
pub fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    match field(value, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|p| p / 100.0),
                None => trimmed.parse::<f64>().ok(),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_any_key_spelling() {
        let v = json!({"when_to_use": "Daily", "Success Indicators": ["Up", " ", "Flat"]});
        assert_eq!(str_field(&v, &["whenToUse"]), Some("Daily".into()));
        assert_eq!(
            str_list(&v, &["successIndicators"]),
            Some(vec!["Up".into(), "Flat".into()])
        );
        assert_eq!(str_field(&v, &["purpose"]), None);
    }

    #[test]
    fn splits_strings_into_lists() {
        let v = json!({"risks": "- Divides by zero\n- Slow; ignores filters"});
        assert_eq!(
            str_list(&v, &["risks"]),
            Some(vec![
                "Divides by zero".into(),
                "Slow".into(),
                "ignores filters".into()
            ])
        );
    }

    #[test]
    fn blank_and_wrong_shapes_are_absent() {
        let v = json!({"purpose": "  ", "risks": [], "terms": {"a": 1}, "confidence": "85%"});
        assert_eq!(str_field(&v, &["purpose"]), None);
        assert_eq!(str_list(&v, &["risks"]), None);
        assert_eq!(array_field(&v, &["terms"]), None);
        assert_eq!(number_field(&v, &["confidence"]), Some(0.85));
        assert_eq!(str_field(&json!([1, 2]), &["x"]), None);
    }
}

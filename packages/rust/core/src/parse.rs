//! Tolerant JSON recovery from generated text.
//!
//! Generated output is JSON at best and JSON buried in prose or code fences
//! at worst. Recovery is an ordered ladder of pure attempts; the first that
//! yields a value wins.

use serde_json::Value;

/// Which rung of the ladder produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole text is JSON.
    Strict,
    /// JSON inside a fenced code block.
    Unfenced,
    /// The last top-level `{...}` or `[...]` in the text.
    Extracted,
}

type Attempt = fn(&str) -> Option<Value>;

const LADDER: [(ParseStrategy, Attempt); 3] = [
    (ParseStrategy::Strict, parse_strict),
    (ParseStrategy::Unfenced, parse_unfenced),
    (ParseStrategy::Extracted, parse_extracted),
];

fn parse_strict(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Contents of the first fenced block, language tag dropped. An unclosed
/// fence runs to the end of the text.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
    let body = &after[body_start..];
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    Some(body)
}

fn parse_unfenced(text: &str) -> Option<Value> {
    parse_strict(fenced_body(text)?)
}

/// Byte spans of every top-level bracketed structure, skipping brackets
/// inside JSON strings.
fn top_level_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if !stack.is_empty() => in_string = true,
            '{' | '[' => {
                if stack.is_empty() {
                    start = i;
                }
                stack.push(if c == '{' { '}' } else { ']' });
            }
            '}' | ']' => match stack.last() {
                Some(expected) if *expected == c => {
                    stack.pop();
                    if stack.is_empty() {
                        spans.push((start, i + c.len_utf8()));
                    }
                }
                // Mismatched closer: abandon the current structure.
                Some(_) => stack.clear(),
                None => {}
            },
            _ => {}
        }
    }
    spans
}

fn parse_extracted(text: &str) -> Option<Value> {
    top_level_spans(text)
        .into_iter()
        .rev()
        .find_map(|(start, end)| serde_json::from_str(&text[start..end]).ok())
}

/// Run the ladder; `None` when no rung recovers a value.
pub fn parse_tolerant(text: &str) -> Option<(Value, ParseStrategy)> {
    LADDER
        .iter()
        .find_map(|(strategy, attempt)| attempt(text).map(|v| (v, *strategy)))
}

//! Formula pre-scanning.
//!
//! Rules match against cleaned copies of the formula so that comments and
//! string literals never trigger a finding. Scanning is a single pass over
//! chars and accepts any input, including unbalanced quotes or brackets.

/// Cleaned views of a formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scanned {
    /// Comments removed, string literal contents blanked to `""`.
    pub code: String,
    /// As `code`, with quoted table names and bracketed names also blanked
    /// (`''`, `[]`) so only operators and function names remain.
    pub operators: String,
}

impl Scanned {
    /// True when the formula has no code after cleaning.
    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }
}

/// Scan a formula into its cleaned views.
pub fn scan(formula: &str) -> Scanned {
    let mut code = String::with_capacity(formula.len());
    let mut operators = String::with_capacity(formula.len());
    let mut chars = formula.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // Line comments: `//` and `--`
            '/' | '-' if chars.peek() == Some(&c) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        code.push('\n');
                        operators.push('\n');
                        break;
                    }
                }
            }
            // Block comments
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                code.push(' ');
                operators.push(' ');
            }
            // String literals, `""` escapes a quote
            '"' => {
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                        }
                        Some('"') | None => break,
                        Some(_) => {}
                    }
                }
                code.push_str("\"\"");
                operators.push_str("\"\"");
            }
            // Quoted table names, `''` escapes a quote
            '\'' => {
                let mut ident = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            ident.push_str("''");
                        }
                        Some('\'') | None => break,
                        Some(other) => ident.push(other),
                    }
                }
                code.push('\'');
                code.push_str(&ident);
                code.push('\'');
                operators.push_str("''");
            }
            '[' => {
                let mut name = String::new();
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                    name.push(next);
                }
                code.push('[');
                code.push_str(&name);
                code.push(']');
                operators.push_str("[]");
            }
            other => {
                code.push(other);
                operators.push(other);
            }
        }
    }

    Scanned { code, operators }
}

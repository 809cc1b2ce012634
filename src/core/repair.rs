//! Textual repair heuristics for almost-JSON provider output.
//!
//! A small fixed set of transformations, each testable on its own:
//! - [`strip_code_fences`]: drop Markdown fence lines
//! - [`balance_braces`]: append missing closers, drop excess ones
//! - [`strip_trailing_commas`]: remove `,` directly before `}` or `]`
//!
//! Success is not guaranteed. Callers fall back to partial extraction when
//! [`repair_to_value`] returns `None`.

use serde_json::Value;

/// Remove Markdown code fence lines (```` ``` ```` and ```` ```json ````).
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The slice from the first `{` to the last `}`, if both exist in order.
#[must_use]
pub fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Lenient span for repair: everything from the first `{`.
///
/// [`balance_braces`] stops at the close of the root value, so trailing prose
/// is dropped there.
#[must_use]
pub fn loose_json_span(text: &str) -> Option<&str> {
    text.find('{').map(|start| &text[start..])
}

/// Remove commas that directly precede a closing brace or bracket, ignoring
/// anything inside string literals.
#[must_use]
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}' | ']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Balance `{}`/`[]` outside string literals.
///
/// Missing closers are appended in nesting order, an unterminated string is
/// closed first, and closers with no matching opener are dropped. Anything
/// after the root value closes is discarded.
#[must_use]
pub fn balance_braces(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if stack.contains(&c) {
                    // Close anything left open inside this scope first.
                    while let Some(expected) = stack.pop() {
                        out.push(expected);
                        if expected == c {
                            break;
                        }
                    }
                    if stack.is_empty() {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Apply the heuristics to the loose JSON span of `text` and parse.
///
/// Returns `None` when the text has no `{` at all or is still invalid after
/// repair.
#[must_use]
pub fn repair_to_value(text: &str) -> Option<Value> {
    let unfenced = strip_code_fences(text);
    let span = loose_json_span(&unfenced)?;
    let repaired = strip_trailing_commas(&balance_braces(span));
    let value = serde_json::from_str::<Value>(&repaired).ok()?;
    tracing::debug!(
        original_len = text.len(),
        repaired_len = repaired.len(),
        "Repaired provider JSON"
    );
    Some(value)
}

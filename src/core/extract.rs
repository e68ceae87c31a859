//! Structured-output extraction
//!
//! Agent replies are free text with a JSON fragment buried somewhere inside:
//! a sub-task array before a trailing "TERMINATE", a fenced ```json block,
//! or — on a bad day — a single-quoted literal the model emitted instead of
//! valid JSON. This module digs the fragment out and parses it tolerantly.
//! A failed parse is a retryable `Error::Parse`, never fatal; the
//! orchestrator decides how many retries the operation gets.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// Greedy spans, multi-line with dot matching newlines, mirroring how the
// planning replies embed their arrays in surrounding prose.
static BRACKET_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\[.*\]").expect("static pattern compiles"));
static FENCED_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```.*```").expect("static pattern compiles"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("static pattern compiles"));

/// Locate and parse the structured fragment embedded in `text`.
///
/// Search order: first greedy `[...]` span, then a triple-backtick fenced
/// block, then the whole text as a last resort. Trailing prose outside the
/// matched span is discarded, not an error.
pub fn extract_structured(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let candidate = BRACKET_SPAN
        .find(trimmed)
        .or_else(|| FENCED_SPAN.find(trimmed))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    parse_fragment(candidate)
}

/// Variant for replies whose payload is an object inside a fenced block,
/// e.g. annotation-check output. Bracket spans would match a nested array
/// (like `field_desc`) before the enclosing object, so the fence wins here.
pub fn extract_fenced(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let candidate = FENCED_SPAN
        .find(trimmed)
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    parse_fragment(candidate)
}

/// Parse a fragment that is already known to hold the payload, e.g. the
/// fenced block of an annotation-check reply.
pub fn parse_fragment(fragment: &str) -> Result<Value> {
    let cleaned = strip_markup(fragment);
    if cleaned.is_empty() {
        return Err(Error::Parse("no structured content found".to_string()));
    }

    match serde_json::from_str(&cleaned) {
        Ok(value) => Ok(value),
        Err(strict_err) => parse_literal(&cleaned).ok_or_else(|| {
            Error::Parse(format!(
                "not valid JSON ({strict_err}) and literal fallback failed: {}",
                snippet(&cleaned)
            ))
        }),
    }
}

/// Strip markdown fences and newlines the way the replies require before
/// parsing: ```json / ``` markers go first, then every newline.
fn strip_markup(fragment: &str) -> String {
    fragment
        .replace("```json", "")
        .replace("```", "")
        .replace('\n', "")
        .trim()
        .to_string()
}

/// Permissive literal parse covering what models emit instead of JSON:
/// single-quoted strings, Python-style True/False/None, trailing commas.
fn parse_literal(cleaned: &str) -> Option<Value> {
    let normalized = normalize_literal(cleaned);
    let normalized = TRAILING_COMMA.replace_all(&normalized, "$1");
    serde_json::from_str(&normalized).ok()
}

fn normalize_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // Single-quoted string: convert to a double-quoted JSON string,
            // escaping any double quotes inside it.
            '\'' => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some('"') => out.push_str("\\\""),
                            Some(other) => {
                                out.push('\\');
                                out.push(other);
                            }
                            None => break,
                        },
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            // Double-quoted string: copy verbatim, honoring escapes.
            '"' => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == '"' {
                        break;
                    }
                }
            }
            // Bare word: translate Python constants, keep anything else.
            c if c.is_ascii_alphabetic() => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    _ => out.push_str(&word),
                }
            }
            other => out.push(other),
        }
    }

    out
}

fn snippet(s: &str) -> String {
    const LIMIT: usize = 120;
    if s.chars().count() <= LIMIT {
        s.to_string()
    } else {
        let cut: String = s.chars().take(LIMIT).collect();
        format!("{cut}…")
    }
}

/// A planned sub-task: chart or analysis step the planner wants executed.
/// Elements missing either field are malformed and get dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDemand {
    pub name: String,
    pub description: String,
}

/// A chart slated for deletion. The wire key is `report_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteDemand {
    pub report_name: String,
}

/// Extract a sub-task list from a planning reply.
///
/// Malformed elements are dropped; if nothing usable survives, the whole
/// parse is a retryable failure so the planning conversation runs again.
pub fn extract_demands(text: &str) -> Result<Vec<TaskDemand>> {
    let items = extract_array(text)?;
    let demands: Vec<TaskDemand> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<TaskDemand>(item).ok())
        .filter(|demand| !demand.name.trim().is_empty())
        .collect();

    if demands.is_empty() {
        Err(Error::Parse(
            "reply contained no well-formed sub-task demands".to_string(),
        ))
    } else {
        Ok(demands)
    }
}

/// Extract the chart names a deleter reply wants removed.
///
/// Unlike planning, an empty surviving list is a valid answer here — the
/// delete flow maps it to its fixed failure message without retrying.
pub fn extract_delete_demands(text: &str) -> Result<Vec<DeleteDemand>> {
    let items = extract_array(text)?;
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<DeleteDemand>(item).ok())
        .filter(|demand| !demand.report_name.trim().is_empty())
        .collect())
}

fn extract_array(text: &str) -> Result<Vec<Value>> {
    match extract_structured(text)? {
        Value::Array(items) => Ok(items),
        other => Err(Error::Parse(format!(
            "expected a JSON array, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recovers_array_embedded_in_prose() {
        let reply = r#"Here is the plan you asked for:
[{"name": "Q1 2019 Sales", "description": "Quarterly sales by region"}]
Let me know if it looks right. TERMINATE"#;

        let value = extract_structured(reply).unwrap();
        assert_eq!(
            value,
            json!([{"name": "Q1 2019 Sales", "description": "Quarterly sales by region"}])
        );
    }

    #[test]
    fn recovers_fenced_object() {
        let reply = "Checked. Result:\n```json\n{\"table_name\": \"orders\", \"is_pass\": 1}\n```";
        let value = extract_structured(reply).unwrap();
        assert_eq!(value, json!({"table_name": "orders", "is_pass": 1}));
    }

    #[test]
    fn whole_text_is_candidate_when_no_span_matches() {
        let value = extract_structured("{\"state\": 200}").unwrap();
        assert_eq!(value, json!({"state": 200}));
    }

    #[test]
    fn falls_back_to_single_quoted_literals() {
        let reply = "[{'name': 'Top Sellers', 'description': 'The \"big\" ones'}]";
        let value = extract_structured(reply).unwrap();
        assert_eq!(
            value,
            json!([{"name": "Top Sellers", "description": "The \"big\" ones"}])
        );
    }

    #[test]
    fn translates_python_constants_and_trailing_commas() {
        let reply = "{'table_name': 'orders', 'is_pass': True, 'hidden': None,}";
        let value = extract_structured(reply).unwrap();
        assert_eq!(
            value,
            json!({"table_name": "orders", "is_pass": true, "hidden": null})
        );
    }

    #[test]
    fn fenced_extraction_keeps_the_enclosing_object() {
        let reply = "Done.\n```json\n{\"table_name\": \"orders\", \"field_desc\": [{\"name\": \"id\", \"is_pass\": 1}], \"is_pass\": 1}\n```";
        let value = extract_fenced(reply).unwrap();
        assert_eq!(value["table_name"], "orders");
        assert_eq!(value["field_desc"][0]["name"], "id");
    }

    #[test]
    fn unparseable_text_is_a_parse_error() {
        let err = extract_structured("no structure to be found here").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn demand_extraction_drops_malformed_elements() {
        let reply = r#"[{"name": "A", "description": "first"}, {"name": "B"}, {"description": "orphan"}]"#;
        let demands = extract_demands(reply).unwrap();
        assert_eq!(demands.len(), 1);
        assert_eq!(demands[0].name, "A");
    }

    #[test]
    fn all_malformed_demands_force_a_retryable_failure() {
        let err = extract_demands(r#"[{}, {"description": "x"}]"#).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn delete_demands_may_be_empty_without_error() {
        let demands = extract_delete_demands("[{}]").unwrap();
        assert!(demands.is_empty());

        let demands = extract_delete_demands(r#"[{"report_name": "Sales 2019"}]"#).unwrap();
        assert_eq!(demands[0].report_name, "Sales 2019");
    }

    #[test]
    fn object_reply_is_not_an_array_of_demands() {
        let err = extract_demands(r#"{"name": "A", "description": "x"}"#).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}

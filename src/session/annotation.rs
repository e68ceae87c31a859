//! Annotation completeness check
//!
//! The client submits its table descriptions (name, comment, field list)
//! and gets the same structure back with an `is_pass` verdict per table
//! and per field; every other field travels through unmodified. Each table
//! is checked by its own bounded conversation; a table whose check times
//! out or fails keeps the default verdict of 0. A progress envelope goes
//! out after every table, then the full annotated structure.

use serde_json::{json, Value};

use super::{Outbound, Session};
use crate::core::budget;
use crate::core::extract;

/// Run the annotation check over the submitted tables, emitting progress
/// and the final echo through the session's outbound queue.
pub async fn check_annotations(session: &Session, mut tables: Vec<Value>, receiver: &str) {
    let locale = session.orchestrator().agents().profile().locale;
    let strings = locale.strings();

    // Every entry must be a table object; anything else is a malformed
    // envelope, answered instead of crashing the session task.
    if tables.iter().any(|table| !table.is_object()) {
        session.emit(Outbound::answer(500, "answer", strings.bad_envelope, receiver));
        return;
    }

    // Size guard before any conversation: the whole submission must fit
    // the annotation ceiling.
    let rendered = serde_json::to_string(&tables).unwrap_or_default();
    let tokens = budget::count_text(&rendered);
    if tokens > session.annotation_ceiling() {
        session.emit(Outbound::answer(
            500,
            "answer",
            locale.oversize_message(tokens, session.annotation_ceiling()),
            receiver,
        ));
        return;
    }

    let total = tables.len().max(1);
    for (index, table) in tables.iter_mut().enumerate() {
        if table.get("is_pass").and_then(Value::as_i64) == Some(1) {
            tracing::debug!("[annotation] table {index} already passed, skipping");
        } else {
            normalize_defaults(table);

            let opening = format!(
                "{}\n{}",
                strings.check_annotation_ask,
                serde_json::to_string(table).unwrap_or_default()
            );
            let checked =
                tokio::time::timeout(session.check_timeout(), session.checker_reply(&opening))
                    .await;

            match checked {
                Ok(Ok(reply)) => match extract::extract_fenced(&reply) {
                    Ok(verdict) => merge_verdict(table, &verdict),
                    Err(err) => {
                        tracing::warn!("[annotation] verdict unusable for table {index}: {err}");
                    }
                },
                Ok(Err(err)) => {
                    tracing::warn!("[annotation] check failed for table {index}: {err}");
                }
                Err(_) => {
                    tracing::warn!("[annotation] check timed out for table {index}");
                }
            }
        }

        ensure_verdicts(table);

        let percent = ((index + 1) * 100) / total;
        session.emit(Outbound::answer(
            200,
            "progress",
            format!("{percent}%"),
            receiver,
        ));
    }

    session.emit(Outbound::answer(200, "comment", Value::Array(tables), receiver));
}

/// Blank comments default to the corresponding name before the checker
/// sees them, so "no comment at all" is judged, not skipped.
fn normalize_defaults(table: &mut Value) {
    let table_name = table
        .get("table_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if comment_is_blank(table) {
        table["comment"] = json!(table_name);
    }

    if let Some(fields) = table.get_mut("field_desc").and_then(Value::as_array_mut) {
        for field in fields {
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if comment_is_blank(field) {
                field["comment"] = json!(name);
            }
        }
    }
}

fn comment_is_blank(value: &Value) -> bool {
    value
        .get("comment")
        .and_then(Value::as_str)
        .map_or(true, |comment| comment.trim().is_empty())
}

/// Copy `is_pass` flags from the checker's verdict into the submitted
/// structure, matching fields by name. Nothing else is touched.
fn merge_verdict(table: &mut Value, verdict: &Value) {
    if let Some(is_pass) = verdict.get("is_pass").and_then(Value::as_i64) {
        table["is_pass"] = json!(is_pass);
    }

    let Some(verdict_fields) = verdict.get("field_desc").and_then(Value::as_array) else {
        return;
    };
    let Some(fields) = table.get_mut("field_desc").and_then(Value::as_array_mut) else {
        return;
    };

    for field in fields {
        let name = field.get("name").and_then(Value::as_str);
        let flag = verdict_fields
            .iter()
            .find(|v| v.get("name").and_then(Value::as_str) == name)
            .and_then(|v| v.get("is_pass"))
            .and_then(Value::as_i64);
        if let Some(flag) = flag {
            field["is_pass"] = json!(flag);
        }
    }
}

/// Everything the checker did not visit gets an explicit verdict of 0.
fn ensure_verdicts(table: &mut Value) {
    if table.get("is_pass").and_then(Value::as_i64).is_none() {
        table["is_pass"] = json!(0);
    }
    if let Some(fields) = table.get_mut("field_desc").and_then(Value::as_array_mut) {
        for field in fields {
            if field.get("is_pass").and_then(Value::as_i64).is_none() {
                field["is_pass"] = json!(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_comments_fall_back_to_names() {
        let mut table = json!({
            "table_name": "orders",
            "comment": "",
            "field_desc": [
                {"name": "id", "comment": "primary key"},
                {"name": "region", "comment": "  "}
            ]
        });
        normalize_defaults(&mut table);
        assert_eq!(table["comment"], "orders");
        assert_eq!(table["field_desc"][0]["comment"], "primary key");
        assert_eq!(table["field_desc"][1]["comment"], "region");
    }

    #[test]
    fn verdict_merge_only_touches_is_pass() {
        let mut table = json!({
            "table_name": "orders",
            "comment": "order facts",
            "custom_flag": true,
            "field_desc": [
                {"name": "id", "comment": "primary key"},
                {"name": "region", "comment": "sales region"}
            ]
        });
        let verdict = json!({
            "table_name": "orders",
            "is_pass": 1,
            "field_desc": [
                {"name": "region", "is_pass": 0},
                {"name": "id", "is_pass": 1}
            ]
        });

        merge_verdict(&mut table, &verdict);
        ensure_verdicts(&mut table);

        assert_eq!(table["is_pass"], 1);
        assert_eq!(table["custom_flag"], true);
        assert_eq!(table["comment"], "order facts");
        assert_eq!(table["field_desc"][0]["is_pass"], 1);
        assert_eq!(table["field_desc"][1]["is_pass"], 0);
    }

    #[test]
    fn unvisited_entries_default_to_zero() {
        let mut table = json!({
            "table_name": "orders",
            "field_desc": [{"name": "id"}]
        });
        ensure_verdicts(&mut table);
        assert_eq!(table["is_pass"], 0);
        assert_eq!(table["field_desc"][0]["is_pass"], 0);
    }
}

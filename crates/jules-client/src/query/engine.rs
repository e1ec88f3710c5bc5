//! Local JQL: field projection with array existential semantics, filtering,
//! ordering, computed fields. A pure function over already-fetched records;
//! no I/O happens here (the stores are read by the caller).

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::model::{Activity, ActivityPayload, Session};

use super::schema::{field_kind, is_known_field, FieldKind};
use super::types::{FilterOp, Order, QueryRequest, QuerySource, WhereClause};

const MAX_LIMIT: i64 = 1000;

pub fn validate(request: &QueryRequest) -> Result<()> {
    let Some(source) = request.from else {
        return Err(Error::InvalidQuery {
            message: "`from` is required and must be `sessions` or `activities`".to_string(),
        });
    };
    for path in &request.select {
        let trimmed = path.trim_start_matches('-');
        if trimmed != "*" && trimmed.is_empty() {
            return Err(Error::InvalidQuery {
                message: format!("invalid select path: {path:?}"),
            });
        }
    }
    for clause in &request.where_clauses {
        if clause.field == "search" {
            continue;
        }
        if field_kind(source, &clause.field) == FieldKind::Computed {
            return Err(Error::InvalidQuery {
                message: format!("cannot filter on computed field `{}`", clause.field),
            });
        }
        if !is_known_field(source, &clause.field) {
            tracing::warn!(field = %clause.field, "filtering unknown field");
        }
        validate_operator_types(&clause.op)?;
    }
    if let Some(limit) = request.limit {
        if limit < 0 {
            return Err(Error::InvalidQuery {
                message: "`limit` must be non-negative".to_string(),
            });
        }
    }
    Ok(())
}

fn validate_operator_types(op: &FilterOp) -> Result<()> {
    match op {
        FilterOp::Contains(_) => Ok(()),
        FilterOp::In(_) => Ok(()),
        FilterOp::Exists(_) => Ok(()),
        FilterOp::Eq(v) | FilterOp::Neq(v) | FilterOp::Gt(v) | FilterOp::Lt(v) | FilterOp::Gte(v) | FilterOp::Lte(v) => {
            if v.is_object() {
                Err(Error::InvalidQuery {
                    message: "comparison operators require a scalar value".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

pub fn clamp_limit(limit: Option<i64>) -> Option<i64> {
    limit.map(|l| {
        if l > MAX_LIMIT {
            tracing::warn!(limit = l, cap = MAX_LIMIT, "query limit capped");
            MAX_LIMIT
        } else {
            l
        }
    })
}

pub fn session_to_record(session: &Session) -> Value {
    let mut value = serde_json::to_value(session).unwrap_or(Value::Null);
    let duration_ms = (session.update_time - session.create_time)
        .num_milliseconds()
        .max(0);
    if let Value::Object(map) = &mut value {
        map.insert("durationMs".to_string(), json!(duration_ms));
    }
    value
}

pub fn activity_to_record(activity: &Activity) -> Value {
    let mut value = serde_json::to_value(activity).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("artifactCount".to_string(), json!(activity.artifacts.len()));
        map.insert("summary".to_string(), json!(summarize(activity)));
    }
    value
}

pub(crate) fn summarize(activity: &Activity) -> String {
    match &activity.payload {
        ActivityPayload::PlanGenerated { plan } => format!("Plan with {} steps", plan.steps.len()),
        ActivityPayload::PlanApproved { .. } => "Plan approved".to_string(),
        ActivityPayload::SessionCompleted {} => "Session completed".to_string(),
        ActivityPayload::SessionFailed { reason } => {
            format!("Failed: {}", reason.clone().unwrap_or_default())
        }
        ActivityPayload::UserMessaged { message } => format!("User: {}", truncate(message)),
        ActivityPayload::AgentMessaged { message } => format!("Agent: {}", truncate(message)),
        ActivityPayload::ProgressUpdated { title, description } => title
            .clone()
            .or_else(|| description.clone())
            .unwrap_or_else(|| "Progress update".to_string()),
        ActivityPayload::Unknown => activity.payload.type_name().to_string(),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > 100 {
        let head: String = s.chars().take(100).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

/// Resolves a dot-path against a JSON value with array existential
/// semantics: at an array, the path projects into every element,
/// preserving array shape.
fn get_path<'a>(value: &'a Value, path: &str) -> Option<Vec<&'a Value>> {
    let mut frontier = vec![value];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for v in frontier {
            match v {
                Value::Array(items) => {
                    for item in items {
                        if let Some(field) = item.get(segment) {
                            next.push(field);
                        }
                    }
                }
                Value::Object(_) => {
                    if let Some(field) = v.get(segment) {
                        next.push(field);
                    }
                }
                _ => {}
            }
        }
        if next.is_empty() {
            return None;
        }
        frontier = next;
    }
    Some(frontier)
}

fn project(value: &Value, select: &[String]) -> Value {
    if select.is_empty() {
        return value.clone();
    }
    let has_wildcard = select.iter().any(|p| p == "*");
    let excludes: Vec<&str> = select
        .iter()
        .filter_map(|p| p.strip_prefix('-'))
        .collect();
    let includes: Vec<&str> = select
        .iter()
        .filter(|p| !p.starts_with('-') && *p != "*")
        .map(String::as_str)
        .collect();

    let base = if has_wildcard {
        value.clone()
    } else if includes.is_empty() {
        Value::Object(Map::new())
    } else {
        let mut out = Map::new();
        for path in &includes {
            if let Some(field) = value.get(path) {
                out.insert(path.to_string(), field.clone());
            } else if let Some(projected) = project_array_path(value, path) {
                set_nested(&mut out, path, projected);
            }
        }
        Value::Object(out)
    };

    if excludes.is_empty() {
        base
    } else {
        remove_paths(base, &excludes)
    }
}

fn project_array_path(value: &Value, path: &str) -> Option<Value> {
    let mut segments = path.splitn(2, '.');
    let head = segments.next()?;
    let rest = segments.next();
    let field = value.get(head)?;
    match (field, rest) {
        (Value::Array(items), Some(rest)) => {
            // Each array element stays an object carrying the projected leaf
            // key(s), e.g. `artifacts.type` yields `[{"type": ...}, ...]`
            // rather than flattening to bare leaf values.
            let projected: Vec<Value> = items
                .iter()
                .map(|item| project(item, &[rest.to_string()]))
                .collect();
            Some(Value::Array(projected))
        }
        (_, Some(rest)) => project_array_path(field, rest),
        (_, None) => Some(field.clone()),
    }
}

fn set_nested(map: &mut Map<String, Value>, path: &str, value: Value) {
    let top = path.split('.').next().unwrap_or(path);
    map.insert(top.to_string(), value);
}

fn remove_paths(mut value: Value, excludes: &[&str]) -> Value {
    for path in excludes {
        let top = path.split('.').next().unwrap_or(path);
        if let Value::Object(map) = &mut value {
            if !path.contains('.') {
                map.remove(top);
            }
        }
    }
    value
}

fn matches_clause(value: &Value, clause: &WhereClause) -> bool {
    if clause.field == "search" {
        let haystack = value.to_string().to_lowercase();
        if let FilterOp::Eq(Value::String(s)) = &clause.op {
            return haystack.contains(&s.to_lowercase());
        }
        return false;
    }
    let Some(candidates) = get_path(value, &clause.field) else {
        return matches!(clause.op, FilterOp::Exists(false));
    };
    candidates.iter().any(|c| matches_op(c, &clause.op))
}

fn matches_op(value: &Value, op: &FilterOp) -> bool {
    match op {
        FilterOp::Eq(v) => value == v,
        FilterOp::Neq(v) => value != v,
        FilterOp::Gt(v) => compare(value, v) == Some(std::cmp::Ordering::Greater),
        FilterOp::Lt(v) => compare(value, v) == Some(std::cmp::Ordering::Less),
        FilterOp::Gte(v) => matches!(
            compare(value, v),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOp::Lte(v) => matches!(
            compare(value, v),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOp::Contains(s) => value.as_str().is_some_and(|v| v.contains(s.as_str())),
        FilterOp::In(options) => options.contains(value),
        FilterOp::Exists(expected) => !value.is_null() == *expected,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub fn run(request: &QueryRequest, source: QuerySource, records: Vec<Value>) -> Result<Vec<Value>> {
    validate(request)?;
    debug_assert_eq!(request.from, Some(source));

    let mut filtered: Vec<Value> = records
        .into_iter()
        .filter(|r| request.where_clauses.iter().all(|c| matches_clause(r, c)))
        .collect();

    if let Some(order) = request.order {
        filtered.sort_by(|a, b| {
            let ka = a.get("createTime").and_then(Value::as_str).unwrap_or_default();
            let kb = b.get("createTime").and_then(Value::as_str).unwrap_or_default();
            match order {
                Order::Asc => ka.cmp(kb),
                Order::Desc => kb.cmp(ka),
            }
        });
    }

    if let Some(cursor) = &request.start_after {
        if let Some(pos) = filtered.iter().position(|r| r.get("id").and_then(Value::as_str) == Some(cursor)) {
            filtered = filtered.split_off(pos + 1);
        }
    } else if let Some(cursor) = &request.start_at {
        if let Some(pos) = filtered.iter().position(|r| r.get("id").and_then(Value::as_str) == Some(cursor)) {
            filtered = filtered.split_off(pos);
        }
    }

    if let Some(offset) = request.offset {
        filtered = filtered.into_iter().skip(offset).collect();
    }

    if let Some(limit) = clamp_limit(request.limit) {
        filtered.truncate(limit.max(0) as usize);
    }

    Ok(filtered.into_iter().map(|r| project(&r, &request.select)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, Originator};
    use chrono::Utc;

    fn activity_with_artifacts() -> Activity {
        Activity {
            id: "a1".into(),
            create_time: Utc::now(),
            originator: Originator::Agent,
            artifacts: vec![
                Artifact::BashOutput {
                    command: "ls".into(),
                    stdout: "".into(),
                    stderr: "".into(),
                    exit_code: Some(1),
                },
                Artifact::Media {
                    data: "".into(),
                    format: "image/png".into(),
                },
            ],
            payload: ActivityPayload::AgentMessaged { message: "hi".into() },
        }
    }

    #[test]
    fn select_projects_array_field_preserving_shape() {
        let record = activity_to_record(&activity_with_artifacts());
        let projected = project(&record, &["id".to_string(), "artifacts.type".to_string()]);
        let types: Vec<&str> = projected["artifacts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["bashOutput", "media"]);
        assert_eq!(projected["id"], json!("a1"));
    }

    #[test]
    fn where_on_array_field_matches_existentially() {
        let record = activity_to_record(&activity_with_artifacts());
        let clause = WhereClause {
            field: "artifacts.exitCode".to_string(),
            op: FilterOp::Gt(json!(0)),
        };
        assert!(matches_clause(&record, &clause));
    }

    #[test]
    fn filtering_computed_field_is_rejected() {
        let request = QueryRequest {
            from: Some(QuerySource::Activities),
            where_clauses: vec![WhereClause {
                field: "summary".to_string(),
                op: FilterOp::Eq(json!("x")),
            }],
            ..Default::default()
        };
        assert!(matches!(validate(&request), Err(Error::InvalidQuery { .. })));
    }

    #[test]
    fn missing_from_is_rejected() {
        let request = QueryRequest::default();
        assert!(validate(&request).is_err());
    }
}

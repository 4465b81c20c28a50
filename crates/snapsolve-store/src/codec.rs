//! Conversion between domain records and Firestore REST typed values.
//!
//! Firestore documents carry a `fields` map where every value is wrapped in a
//! type tag (`stringValue`, `doubleValue`, ...). Integers are serialized as
//! strings on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use snapsolve_core::{MathAnswer, MathProblem, Result, SnapSolveError, SolutionStep};

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn optional_string_value(s: &Option<String>) -> Value {
    match s {
        Some(s) => string_value(s),
        None => json!({ "nullValue": null }),
    }
}

fn integer_value(i: i64) -> Value {
    json!({ "integerValue": i.to_string() })
}

fn double_value(f: f64) -> Value {
    json!({ "doubleValue": f })
}

fn timestamp_value(dt: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": dt.to_rfc3339_opts(SecondsFormat::Micros, true) })
}

fn array_value(values: Vec<Value>) -> Value {
    json!({ "arrayValue": { "values": values } })
}

fn map_value(fields: Map<String, Value>) -> Value {
    json!({ "mapValue": { "fields": fields } })
}

fn step_to_value(step: &SolutionStep) -> Value {
    let mut fields = Map::new();
    fields.insert(
        "step_number".to_string(),
        integer_value(step.step_number as i64),
    );
    fields.insert("description".to_string(), string_value(&step.description));
    fields.insert(
        "calculation".to_string(),
        optional_string_value(&step.calculation),
    );
    map_value(fields)
}

fn answer_to_value(answer: &MathAnswer) -> Value {
    let mut fields = Map::new();
    fields.insert("question".to_string(), string_value(&answer.question));
    fields.insert(
        "answer_label".to_string(),
        optional_string_value(&answer.answer_label),
    );
    fields.insert(
        "answer_value".to_string(),
        string_value(&answer.answer_value),
    );
    fields.insert("explanation".to_string(), string_value(&answer.explanation));
    fields.insert(
        "steps".to_string(),
        array_value(answer.steps.iter().map(step_to_value).collect()),
    );
    fields.insert("confidence".to_string(), double_value(answer.confidence));
    map_value(fields)
}

/// Encodes a problem record as a Firestore `fields` map.
///
/// Timestamps are written only when present; `save` normalizes them first.
pub fn problem_to_fields(problem: &MathProblem) -> Value {
    let mut fields = Map::new();
    fields.insert("question".to_string(), string_value(&problem.question));
    fields.insert(
        "answer".to_string(),
        match &problem.answer {
            Some(answer) => answer_to_value(answer),
            None => json!({ "nullValue": null }),
        },
    );
    fields.insert("user_id".to_string(), string_value(&problem.user_id));
    fields.insert("file_name".to_string(), string_value(&problem.file_name));
    fields.insert(
        "content_type".to_string(),
        string_value(&problem.content_type),
    );
    if let Some(created_at) = &problem.created_at {
        fields.insert("created_at".to_string(), timestamp_value(created_at));
    }
    if let Some(updated_at) = &problem.updated_at {
        fields.insert("updated_at".to_string(), timestamp_value(updated_at));
    }
    Value::Object(fields)
}

fn get_str<'a>(fields: &'a Value, key: &str) -> Option<&'a str> {
    fields.get(key)?.get("stringValue")?.as_str()
}

fn get_optional_string(fields: &Value, key: &str) -> Option<String> {
    get_str(fields, key).map(|s| s.to_string())
}

fn get_integer(fields: &Value, key: &str) -> Option<i64> {
    let value = fields.get(key)?.get("integerValue")?;
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn get_double(fields: &Value, key: &str) -> Option<f64> {
    let wrapper = fields.get(key)?;
    if let Some(v) = wrapper.get("doubleValue") {
        return v.as_f64();
    }
    // Whole numbers may come back as integerValue
    wrapper.get("integerValue")?.as_str()?.parse().ok()
}

fn get_timestamp(fields: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(key)?.get("timestampValue")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn value_to_step(value: &Value) -> Result<SolutionStep> {
    let fields = value
        .get("mapValue")
        .and_then(|m| m.get("fields"))
        .ok_or_else(|| SnapSolveError::Upstream("malformed step document".into()))?;

    Ok(SolutionStep {
        step_number: get_integer(fields, "step_number")
            .ok_or_else(|| SnapSolveError::Upstream("step missing step_number".into()))?
            as u32,
        description: get_optional_string(fields, "description")
            .ok_or_else(|| SnapSolveError::Upstream("step missing description".into()))?,
        calculation: get_optional_string(fields, "calculation"),
    })
}

fn value_to_answer(value: &Value) -> Result<MathAnswer> {
    let fields = value
        .get("mapValue")
        .and_then(|m| m.get("fields"))
        .ok_or_else(|| SnapSolveError::Upstream("malformed answer document".into()))?;

    let steps = fields
        .get("steps")
        .and_then(|s| s.get("arrayValue"))
        .and_then(|a| a.get("values"))
        .and_then(|v| v.as_array())
        .map(|values| values.iter().map(value_to_step).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    MathAnswer::new(
        get_optional_string(fields, "question").unwrap_or_default(),
        get_optional_string(fields, "answer_label"),
        get_optional_string(fields, "answer_value")
            .ok_or_else(|| SnapSolveError::Upstream("answer missing answer_value".into()))?,
        get_optional_string(fields, "explanation").unwrap_or_default(),
        steps,
        get_double(fields, "confidence").unwrap_or(0.0),
    )
}

/// Extracts the record id from a full Firestore document name, e.g.
/// `projects/p/databases/(default)/documents/users/u/solutions/abc` -> `abc`.
pub fn document_id_from_name(name: &str) -> Option<&str> {
    name.rsplit('/').next().filter(|id| !id.is_empty())
}

/// Decodes one Firestore document (with `name` and `fields`) into a problem
/// record.
pub fn document_to_problem(document: &Value) -> Result<MathProblem> {
    let name = document
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| SnapSolveError::Upstream("document missing name".into()))?;
    let id = document_id_from_name(name)
        .ok_or_else(|| SnapSolveError::Upstream("document name has no id".into()))?;

    let fields = document
        .get("fields")
        .ok_or_else(|| SnapSolveError::Upstream("document missing fields".into()))?;

    let answer = match fields.get("answer") {
        Some(value) if value.get("mapValue").is_some() => Some(value_to_answer(value)?),
        _ => None,
    };

    Ok(MathProblem {
        id: Some(id.to_string()),
        question: get_optional_string(fields, "question").unwrap_or_default(),
        answer,
        user_id: get_optional_string(fields, "user_id").unwrap_or_default(),
        file_name: get_optional_string(fields, "file_name").unwrap_or_default(),
        content_type: get_optional_string(fields, "content_type").unwrap_or_default(),
        created_at: get_timestamp(fields, "created_at"),
        updated_at: get_timestamp(fields, "updated_at"),
    })
}

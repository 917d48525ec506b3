//! Argument validation against a tool's JSON input schema.
//!
//! Covers the subset tool servers actually advertise: `required`,
//! per-property `type` (single or list), `enum`, and
//! `additionalProperties: false`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// One offending argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Check `arguments` against `schema`; an empty vec means valid.
///
/// `null` arguments are treated as an empty object.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Vec<FieldViolation> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return vec![FieldViolation::new("arguments", "expected an object")],
    };

    let mut violations = Vec::new();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if args.get(field).is_none_or(|v| v.is_null()) {
                violations.push(FieldViolation::new(field, "missing required field"));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());

    for (name, value) in args {
        let Some(property) = properties.and_then(|p| p.get(name)) else {
            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                violations.push(FieldViolation::new(name, "unexpected field"));
            }
            continue;
        };

        if let Some(expected) = property.get("type")
            && !matches_type(expected, value)
        {
            violations.push(FieldViolation::new(
                name,
                format!("expected {}, got {}", describe_type(expected), json_type(value)),
            ));
            continue;
        }

        if let Some(allowed) = property.get("enum").and_then(|e| e.as_array())
            && !allowed.contains(value)
        {
            violations.push(FieldViolation::new(name, "value not in enum"));
        }
    }

    violations
}

/// Names of the violating fields, deduplicated in first-seen order
pub fn violating_fields(violations: &[FieldViolation]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::with_capacity(violations.len());
    for v in violations {
        if !fields.contains(&v.field) {
            fields.push(v.field.clone());
        }
    }
    fields
}

fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => matches_single_type(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| matches_single_type(t, value)),
        _ => true,
    }
}

fn matches_single_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

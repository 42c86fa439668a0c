//! Contract-driven payload validation. All problems are collected into one
//! field-keyed map before failing, so a caller sees every violation at once.

use crate::contract::{FieldContract, FieldType, Operation, ResourceContract};
use crate::error::{EngineError, ValidationErrors};
use regex::Regex;
use serde_json::{Map, Value};

pub fn validate_create(contract: &ResourceContract, payload: &Map<String, Value>) -> Result<(), EngineError> {
    let Some(op) = contract.operation(Operation::Create) else { return Ok(()) };
    let mut errors = ValidationErrors::new();

    for name in payload.keys() {
        // The key field is always accepted on create: a client-supplied id
        // wins over generation even when the key is otherwise read-only.
        if name.eq_ignore_ascii_case(&contract.key_field) {
            continue;
        }
        if !allowed(&op.input, name) {
            errors.push(name.as_str(), "Field is not allowed.");
        }
    }

    for required in &op.required_on_create {
        let value = lookup(payload, required);
        if value.is_none() || value == Some(&Value::Null) {
            errors.push(required.as_str(), "Field is required.");
        }
    }

    check_present_fields(contract, payload, &mut errors);
    errors.into_result()
}

pub fn validate_update(contract: &ResourceContract, payload: &Map<String, Value>) -> Result<(), EngineError> {
    let Some(op) = contract.operation(Operation::Update) else { return Ok(()) };
    let token_field = op.concurrency.as_ref().map(|c| c.token_field.as_str());
    let mut errors = ValidationErrors::new();

    for name in payload.keys() {
        // The concurrency token is immutable but may be echoed back.
        if token_field.map(|t| name.eq_ignore_ascii_case(t)).unwrap_or(false) {
            continue;
        }
        if allowed(&op.immutable, name) {
            errors.push(name.as_str(), "Field is immutable.");
        } else if !allowed(&op.input, name) {
            errors.push(name.as_str(), "Field is not allowed.");
        }
    }

    if let Some(cc) = &op.concurrency {
        if cc.required_on_update {
            let token = lookup(payload, &cc.token_field);
            if token.is_none() || token == Some(&Value::Null) {
                errors.push(cc.token_field.as_str(), "Concurrency token is required.");
            }
        }
    }

    // Partial semantics: only fields present in the patch are constrained.
    check_present_fields(contract, payload, &mut errors);
    errors.into_result()
}

fn check_present_fields(contract: &ResourceContract, payload: &Map<String, Value>, errors: &mut ValidationErrors) {
    for (name, value) in payload {
        let Some(field) = contract.field(name) else { continue };
        check_field(field, value, errors);
    }
}

fn check_field(field: &FieldContract, value: &Value, errors: &mut ValidationErrors) {
    let name = field.api_name.as_str();
    if value.is_null() {
        if !field.nullable && !field.is_key {
            errors.push(name, "Field cannot be null.");
        }
        return;
    }
    if !type_matches(field.field_type, value) {
        errors.push(name, format!("Expected a {} value.", type_label(field.field_type)));
        return;
    }

    let rules = &field.rules;
    if let Some(max) = rules.max_length {
        if let Some(s) = value.as_str() {
            if s.chars().count() > max as usize {
                errors.push(name, format!("Must be at most {} characters.", max));
            }
        }
    }
    if let Some(min) = rules.min_length {
        if let Some(s) = value.as_str() {
            if s.chars().count() < min as usize {
                errors.push(name, format!("Must be at least {} characters.", min));
            }
        }
    }
    if let Some(pattern) = &rules.pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if let Some(s) = value.as_str() {
                    if !re.is_match(s) {
                        errors.push(name, "Does not match the required pattern.");
                    }
                }
            }
            Err(_) => errors.push(name, "Invalid pattern in contract."),
        }
    }
    if let Some(allowed) = &rules.allowed {
        if !allowed.iter().any(|a| value_eq(value, a)) {
            errors.push(name, "Value is not in the allowed set.");
        }
    }
    if let Some(min) = rules.minimum {
        if let Some(n) = value.as_f64() {
            if n < min {
                errors.push(name, format!("Must be at least {}.", min));
            }
        }
    }
    if let Some(max) = rules.maximum {
        if let Some(n) = value.as_f64() {
            if n > max {
                errors.push(name, format!("Must be at most {}.", max));
            }
        }
    }
}

fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::Int32 | FieldType::Int64 => value.as_i64().is_some(),
        FieldType::Decimal => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Guid => value.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false),
        FieldType::DateTime => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        FieldType::String | FieldType::Enum => value.is_string(),
        FieldType::Json => true,
        FieldType::Int32Array | FieldType::Int64Array => value
            .as_array()
            .map(|a| a.iter().all(|v| v.as_i64().is_some()))
            .unwrap_or(false),
        FieldType::StringArray => value.as_array().map(|a| a.iter().all(Value::is_string)).unwrap_or(false),
        FieldType::GuidArray => value
            .as_array()
            .map(|a| {
                a.iter()
                    .all(|v| v.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false))
            })
            .unwrap_or(false),
    }
}

fn type_label(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Int32 | FieldType::Int64 => "integer",
        FieldType::Decimal => "number",
        FieldType::Boolean => "boolean",
        FieldType::Guid => "guid",
        FieldType::DateTime => "datetime",
        FieldType::String | FieldType::Enum => "string",
        FieldType::Json => "json",
        FieldType::Int32Array | FieldType::Int64Array => "integer array",
        FieldType::StringArray => "string array",
        FieldType::GuidArray => "guid array",
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn allowed(set: &std::collections::BTreeSet<String>, name: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(name))
}

fn lookup<'a>(payload: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    payload
        .get(name)
        .or_else(|| payload.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}

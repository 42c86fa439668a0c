//! Typed secondary-index values and per-record row projection.
//!
//! The index stores, per (resource, record, field), one typed projection of the
//! field's value so the dynamic backend can filter and sort without native
//! columns. Projection never fails a write: a value that does not convert to
//! its declared type is kept in the text slot in raw form.

use crate::contract::{FieldType, ResourceContract};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use uuid::Uuid;

/// Exactly one typed slot per row.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Flag(bool),
    Id(Uuid),
}

impl IndexValue {
    fn type_rank(&self) -> u8 {
        match self {
            IndexValue::Text(_) => 0,
            IndexValue::Number(_) => 1,
            IndexValue::Timestamp(_) => 2,
            IndexValue::Flag(_) => 3,
            IndexValue::Id(_) => 4,
        }
    }
}

/// Total order over index values. Values of different slots (possible after a
/// conversion fallback) group by slot type rather than interleaving.
pub fn cmp_values(a: &IndexValue, b: &IndexValue) -> Ordering {
    match (a, b) {
        (IndexValue::Text(x), IndexValue::Text(y)) => x.cmp(y),
        (IndexValue::Number(x), IndexValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (IndexValue::Timestamp(x), IndexValue::Timestamp(y)) => x.cmp(y),
        (IndexValue::Flag(x), IndexValue::Flag(y)) => x.cmp(y),
        (IndexValue::Id(x), IndexValue::Id(y)) => x.cmp(y),
        _ => a.type_rank().cmp(&b.type_rank()),
    }
}

/// One typed projection of a single field's value for one record.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRow {
    pub field: String,
    pub value: IndexValue,
}

/// Operations the dynamic query compiler pushes down to the index.
#[derive(Clone, Debug)]
pub enum IndexPredicate {
    Eq(IndexValue),
    Neq(IndexValue),
    Gt(IndexValue),
    Gte(IndexValue),
    Lt(IndexValue),
    Lte(IndexValue),
    /// Case-insensitive substring match against the text slot.
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    In(Vec<IndexValue>),
    /// `true` matches records with no indexed value for the field.
    IsNull(bool),
}

/// The pure half of an index rebuild: the row set for one document. Callers
/// replace the record's previous rows with this projection in the same commit
/// as the document write.
pub fn project_rows(contract: &ResourceContract, document: &Map<String, Value>) -> Vec<IndexRow> {
    let mut rows = Vec::new();
    for field in &contract.fields {
        if field.hidden || !(field.filterable || field.sortable) {
            continue;
        }
        let Some(value) = document.get(&field.api_name) else { continue };
        if value.is_null() {
            continue;
        }
        let projected = match convert(field.field_type, value) {
            Some(v) => v,
            None => {
                tracing::warn!(
                    field = %field.api_name,
                    declared = ?field.field_type,
                    "index conversion failed, keeping raw text"
                );
                IndexValue::Text(raw_text(value))
            }
        };
        rows.push(IndexRow { field: field.api_name.clone(), value: projected });
    }
    rows
}

fn convert(field_type: FieldType, value: &Value) -> Option<IndexValue> {
    match field_type {
        FieldType::Int32 | FieldType::Int64 => match value {
            Value::Number(n) => n.as_i64().map(|i| IndexValue::Number(i as f64)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| IndexValue::Number(i as f64)),
            _ => None,
        },
        FieldType::Decimal => match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(IndexValue::Number),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(IndexValue::Number),
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Some(IndexValue::Flag(*b)),
            Value::String(s) => parse_bool(s).map(IndexValue::Flag),
            _ => None,
        },
        FieldType::Guid => value.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok()).map(IndexValue::Id),
        FieldType::DateTime => value.as_str().and_then(parse_datetime).map(IndexValue::Timestamp),
        FieldType::String | FieldType::Enum => value.as_str().map(|s| IndexValue::Text(s.to_string())),
        // Arrays and json have no scalar slot; the raw-text fallback applies.
        FieldType::Json
        | FieldType::Int32Array
        | FieldType::Int64Array
        | FieldType::StringArray
        | FieldType::GuidArray => None,
    }
}

/// Raw textual form used as the conversion fallback.
pub fn raw_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses a filter operand for a field. The message names the expected type.
pub fn parse_operand(field_type: FieldType, raw: &str) -> Result<IndexValue, String> {
    let raw = raw.trim();
    match field_type {
        FieldType::Int32 | FieldType::Int64 => raw
            .parse::<i64>()
            .map(|i| IndexValue::Number(i as f64))
            .map_err(|_| format!("'{}' is not an integer.", raw)),
        FieldType::Decimal => raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(IndexValue::Number)
            .ok_or_else(|| format!("'{}' is not a number.", raw)),
        FieldType::Boolean => parse_bool(raw)
            .map(IndexValue::Flag)
            .ok_or_else(|| format!("'{}' is not a boolean.", raw)),
        FieldType::Guid => Uuid::parse_str(raw)
            .map(IndexValue::Id)
            .map_err(|_| format!("'{}' is not a guid.", raw)),
        FieldType::DateTime => parse_datetime(raw)
            .map(IndexValue::Timestamp)
            .ok_or_else(|| format!("'{}' is not a datetime.", raw)),
        // Strings, enums, json, and arrays compare over their textual projection.
        _ => Ok(IndexValue::Text(raw.to_string())),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    // Date-only operands compare from midnight UTC.
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc))
}

/// Evaluates a predicate against a record's indexed value for one field.
/// `None` means the record has no row for the field.
pub fn matches(predicate: &IndexPredicate, value: Option<&IndexValue>) -> bool {
    match predicate {
        IndexPredicate::IsNull(wants_null) => value.is_none() == *wants_null,
        IndexPredicate::Eq(operand) => value.map(|v| same_and(v, operand, Ordering::is_eq)).unwrap_or(false),
        // Records without a value are neither equal nor unequal; `isnull` exists for those.
        IndexPredicate::Neq(operand) => value.map(|v| same_and(v, operand, Ordering::is_ne)).unwrap_or(false),
        IndexPredicate::Gt(operand) => value.map(|v| same_and(v, operand, Ordering::is_gt)).unwrap_or(false),
        IndexPredicate::Gte(operand) => value.map(|v| same_and(v, operand, Ordering::is_ge)).unwrap_or(false),
        IndexPredicate::Lt(operand) => value.map(|v| same_and(v, operand, Ordering::is_lt)).unwrap_or(false),
        IndexPredicate::Lte(operand) => value.map(|v| same_and(v, operand, Ordering::is_le)).unwrap_or(false),
        IndexPredicate::In(operands) => value
            .map(|v| operands.iter().any(|o| same_and(v, o, Ordering::is_eq)))
            .unwrap_or(false),
        IndexPredicate::Contains(term) => text_of(value).map(|t| fold(&t).contains(&fold(term))).unwrap_or(false),
        IndexPredicate::StartsWith(term) => {
            text_of(value).map(|t| fold(&t).starts_with(&fold(term))).unwrap_or(false)
        }
        IndexPredicate::EndsWith(term) => text_of(value).map(|t| fold(&t).ends_with(&fold(term))).unwrap_or(false),
    }
}

fn same_and(v: &IndexValue, operand: &IndexValue, check: impl Fn(Ordering) -> bool) -> bool {
    v.type_rank() == operand.type_rank() && check(cmp_values(v, operand))
}

fn text_of(value: Option<&IndexValue>) -> Option<String> {
    match value {
        Some(IndexValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::builder::build;
    use crate::contract::{FieldDefinition, KeyDefinition, ResourceDefinition};
    use serde_json::json;

    fn contract() -> ResourceContract {
        let fields = vec![
            FieldDefinition {
                name: "title".into(),
                api_name: None,
                type_: FieldType::String,
                nullable: true,
                in_read: true,
                in_create: true,
                in_update: true,
                filterable: true,
                sortable: true,
                searchable: true,
                hidden: false,
                immutable: false,
                computed: None,
                concurrency_token: false,
                default: None,
                validation: Default::default(),
            },
            FieldDefinition {
                name: "count".into(),
                api_name: None,
                type_: FieldType::Int32,
                nullable: true,
                in_read: true,
                in_create: true,
                in_update: true,
                filterable: true,
                sortable: true,
                searchable: false,
                hidden: false,
                immutable: false,
                computed: None,
                concurrency_token: false,
                default: None,
                validation: Default::default(),
            },
            FieldDefinition {
                name: "note".into(),
                api_name: None,
                type_: FieldType::String,
                nullable: true,
                in_read: true,
                in_create: true,
                in_update: true,
                filterable: false,
                sortable: false,
                searchable: false,
                hidden: false,
                immutable: false,
                computed: None,
                concurrency_token: false,
                default: None,
                validation: Default::default(),
            },
        ];
        build(&ResourceDefinition {
            key: "things".into(),
            route: "things".into(),
            backend: Default::default(),
            key_field: KeyDefinition { name: "id".into(), type_: FieldType::Guid },
            max_page_size: None,
            max_expand_depth: None,
            default_sort: None,
            operations: None,
            require_concurrency_token: true,
            fields,
            relations: Vec::new(),
            policies: Default::default(),
        })
    }

    fn doc(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn only_filterable_or_sortable_fields_get_rows() {
        let rows = project_rows(&contract(), &doc(json!({"title": "a", "count": 3, "note": "skipped"})));
        let fields: Vec<&str> = rows.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "count"]);
    }

    #[test]
    fn missing_and_null_fields_produce_no_row() {
        let rows = project_rows(&contract(), &doc(json!({"count": null})));
        assert!(rows.is_empty());
    }

    #[test]
    fn conversion_failure_falls_back_to_raw_text() {
        let rows = project_rows(&contract(), &doc(json!({"count": "not-a-number"})));
        assert_eq!(rows, vec![IndexRow { field: "count".into(), value: IndexValue::Text("not-a-number".into()) }]);
    }

    #[test]
    fn projection_is_idempotent() {
        let d = doc(json!({"title": "a", "count": 3}));
        assert_eq!(project_rows(&contract(), &d), project_rows(&contract(), &d));
    }

    #[test]
    fn operand_parsing_is_typed() {
        assert_eq!(parse_operand(FieldType::Int32, "42"), Ok(IndexValue::Number(42.0)));
        assert_eq!(parse_operand(FieldType::Boolean, "TRUE"), Ok(IndexValue::Flag(true)));
        assert!(parse_operand(FieldType::Int32, "x").is_err());
        assert!(parse_operand(FieldType::DateTime, "2026-08-06").is_ok());
        assert!(parse_operand(FieldType::Guid, "nope").is_err());
    }

    #[test]
    fn null_semantics_for_comparisons() {
        let op = IndexPredicate::Neq(IndexValue::Text("a".into()));
        assert!(!matches(&op, None));
        assert!(matches(&IndexPredicate::IsNull(true), None));
        assert!(!matches(&IndexPredicate::IsNull(true), Some(&IndexValue::Flag(false))));
    }

    #[test]
    fn text_predicates_are_case_insensitive() {
        let v = IndexValue::Text("Buy Milk".into());
        assert!(matches(&IndexPredicate::Contains("milk".into()), Some(&v)));
        assert!(matches(&IndexPredicate::StartsWith("buy".into()), Some(&v)));
        assert!(!matches(&IndexPredicate::EndsWith("buy".into()), Some(&v)));
    }
}

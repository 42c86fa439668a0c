//! Filter/sort/paging grammar shared by the dynamic and relational compilers.
//!
//! Grammar (stable external contract): `filter[field]=op:value` or a bare
//! value (implies `eq`), `sort=field1,-field2`, `page`, `page_size`,
//! `search`, `expand=rel1,rel2`, `fields=f1,f2`. Fields outside the
//! contract's allowlists are dropped silently; a well-formed field with an
//! unparsable value is a validation error.

pub mod dynamic;
pub mod typed;

use crate::contract::{FieldContract, FieldType, ResourceContract};
use crate::error::{EngineError, ValidationErrors};
use crate::index::{self, IndexValue};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// A list request as the excluded HTTP layer hands it over.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Field API name → `"op:value"` or bare `"value"`.
    #[serde(default)]
    pub filter: HashMap<String, String>,
    /// Free-text term checked against every searchable field.
    #[serde(default)]
    pub search: Option<String>,
    /// Comma-separated field names, `-` prefix for descending.
    #[serde(default)]
    pub sort: Option<String>,
    /// Explicit projection list narrowing the read shape.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub expand: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Starts,
    Ends,
    In,
    IsNull,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "contains" => FilterOp::Contains,
            "starts" => FilterOp::Starts,
            "ends" => FilterOp::Ends,
            "in" => FilterOp::In,
            "isnull" => FilterOp::IsNull,
            _ => return None,
        })
    }
}

/// Splits `"op:value"`; anything without a recognized op prefix is a bare
/// `eq` value, so datetimes with colons survive intact.
pub fn split_filter(raw: &str) -> (FilterOp, &str) {
    if let Some((prefix, rest)) = raw.split_once(':') {
        if let Some(op) = FilterOp::parse(prefix.trim()) {
            return (op, rest);
        }
    }
    (FilterOp::Eq, raw)
}

#[derive(Clone, Debug)]
pub enum FilterOperand {
    One(IndexValue),
    Many(Vec<IndexValue>),
    Null(bool),
}

/// One allowlisted filter with its operand(s) parsed to the field's type.
#[derive(Clone, Debug)]
pub struct ResolvedFilter {
    pub field: FieldContract,
    pub op: FilterOp,
    pub operand: FilterOperand,
}

#[derive(Clone, Debug)]
pub struct ResolvedSort {
    pub field: FieldContract,
    pub descending: bool,
}

/// Backend-neutral query plan; each compiler supplies only the primitive
/// field/operator/value translation.
#[derive(Clone, Debug)]
pub struct ResolvedQuery {
    pub filters: Vec<ResolvedFilter>,
    /// Search term plus the searchable field set, OR-combined.
    pub search: Option<(String, Vec<FieldContract>)>,
    /// Empty means the default order: most recently updated first.
    pub sort: Vec<ResolvedSort>,
    pub page: u32,
    pub page_size: u32,
}

pub fn resolve(contract: &ResourceContract, query: &ListQuery) -> Result<ResolvedQuery, EngineError> {
    let mut errors = ValidationErrors::new();
    let mut filters = Vec::new();

    // Deterministic order for error reporting and compiled output.
    let mut names: Vec<&String> = query.filter.keys().collect();
    names.sort();
    for name in names {
        let raw = &query.filter[name];
        let Some(field) = contract.field(name).filter(|f| f.filterable) else {
            tracing::debug!(field = %name, "filter dropped: not filterable");
            continue;
        };
        let (op, value) = split_filter(raw);
        if !op_allowed(field.field_type, op) {
            errors.push(field.api_name.as_str(), "Operator is not supported for this field type.");
            continue;
        }
        let operand = match op {
            FilterOp::IsNull => match value.trim().to_ascii_lowercase().as_str() {
                "true" => FilterOperand::Null(true),
                "false" => FilterOperand::Null(false),
                other => {
                    errors.push(field.api_name.as_str(), format!("'{}' is not a boolean.", other));
                    continue;
                }
            },
            FilterOp::In => {
                let mut values = Vec::new();
                let mut ok = true;
                for alternative in value.split('|') {
                    match index::parse_operand(field.field_type, alternative) {
                        Ok(v) => values.push(v),
                        Err(message) => {
                            errors.push(field.api_name.as_str(), message);
                            ok = false;
                        }
                    }
                }
                if !ok || values.is_empty() {
                    continue;
                }
                FilterOperand::Many(values)
            }
            _ => match index::parse_operand(field.field_type, value) {
                Ok(v) => FilterOperand::One(v),
                Err(message) => {
                    errors.push(field.api_name.as_str(), message);
                    continue;
                }
            },
        };
        filters.push(ResolvedFilter { field: field.clone(), op, operand });
    }

    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .and_then(|term| {
            let fields: Vec<FieldContract> = contract
                .query
                .searchable
                .iter()
                .filter_map(|name| contract.field(name))
                .cloned()
                .collect();
            // No searchable fields: the term is ignored entirely.
            (!fields.is_empty()).then(|| (term.to_string(), fields))
        });

    let sort_spec = query.sort.as_deref().or(contract.query.default_sort.as_deref());
    let sort = resolve_sort(contract, sort_spec);

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, contract.query.max_page_size);

    errors.into_result()?;
    Ok(ResolvedQuery { filters, search, sort, page, page_size })
}

fn resolve_sort(contract: &ResourceContract, spec: Option<&str>) -> Vec<ResolvedSort> {
    let Some(spec) = spec else { return Vec::new() };
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|part| {
            let (name, descending) = match part.strip_prefix('-') {
                Some(rest) => (rest.trim(), true),
                None => (part, false),
            };
            let field = contract.field(name).filter(|f| f.sortable)?;
            Some(ResolvedSort { field: field.clone(), descending })
        })
        .collect()
}

fn op_allowed(field_type: FieldType, op: FilterOp) -> bool {
    use FilterOp::*;
    if op == IsNull {
        return true;
    }
    match field_type {
        FieldType::Int32 | FieldType::Int64 | FieldType::Decimal => {
            matches!(op, Eq | Neq | Gt | Gte | Lt | Lte | In)
        }
        FieldType::DateTime => matches!(op, Eq | Gt | Gte | Lt | Lte),
        FieldType::Boolean => matches!(op, Eq | Neq),
        FieldType::Guid => matches!(op, Eq | Neq | In),
        // Strings, enums, json, and arrays compare over their textual projection.
        FieldType::String
        | FieldType::Enum
        | FieldType::Json
        | FieldType::Int32Array
        | FieldType::Int64Array
        | FieldType::StringArray
        | FieldType::GuidArray => matches!(op, Eq | Neq | Contains | Starts | Ends | In),
    }
}

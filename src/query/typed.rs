//! Renders resolved queries as parameterized SQL for the relational backend.
//!
//! The relational engine itself lives outside this crate; it executes the
//! `QueryBuf` produced here. Identifiers come from the contract only, values
//! always travel as parameters.

use crate::contract::ResourceContract;
use crate::index::IndexValue;
use crate::query::{FilterOp, FilterOperand, ResolvedQuery};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from the contract).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf { sql: String::new(), params: Vec::new() }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// Column name the relational table uses for a record's update timestamp;
/// carries the default "most recently updated first" order.
const UPDATED_COLUMN: &str = "updated_at";

/// SELECT of the read-shape columns with filters, order, and paging applied.
pub fn compile_select(contract: &ResourceContract, resolved: &ResolvedQuery, table: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let columns = contract
        .fields
        .iter()
        .filter(|f| f.in_read)
        .map(|f| quoted(&f.name))
        .collect::<Vec<_>>()
        .join(", ");
    q.sql = format!("SELECT {} FROM {}", columns, quoted(table));
    if let Some(predicate) = render_predicate(resolved, &mut q) {
        q.sql.push_str(" WHERE ");
        q.sql.push_str(&predicate);
    }
    q.sql.push_str(" ORDER BY ");
    q.sql.push_str(&render_order(contract, resolved));
    let limit = q.push_param(Value::Number(resolved.page_size.into()));
    let offset = q.push_param(Value::Number((resolved.page_size * (resolved.page - 1)).into()));
    q.sql.push_str(&format!(" LIMIT ${} OFFSET ${}", limit, offset));
    q
}

/// COUNT over the same predicate, for the pre-paging total.
pub fn compile_count(resolved: &ResolvedQuery, table: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("SELECT COUNT(*) FROM {}", quoted(table));
    if let Some(predicate) = render_predicate(resolved, &mut q) {
        q.sql.push_str(" WHERE ");
        q.sql.push_str(&predicate);
    }
    q
}

fn render_predicate(resolved: &ResolvedQuery, q: &mut QueryBuf) -> Option<String> {
    let mut clauses: Vec<String> = Vec::new();
    for filter in &resolved.filters {
        let column = quoted(&filter.field.name);
        let clause = match &filter.operand {
            FilterOperand::Null(true) => format!("{} IS NULL", column),
            FilterOperand::Null(false) => format!("{} IS NOT NULL", column),
            FilterOperand::Many(values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| format!("${}", q.push_param(param_value(v))))
                    .collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }
            FilterOperand::One(value) => {
                render_compare(&column, filter.op, value, q)
            }
        };
        clauses.push(clause);
    }
    if let Some((term, fields)) = &resolved.search {
        let n = q.push_param(Value::String(format!("%{}%", term)));
        let alternatives: Vec<String> = fields
            .iter()
            .map(|f| format!("{} ILIKE ${}", quoted(&f.name), n))
            .collect();
        if !alternatives.is_empty() {
            clauses.push(format!("({})", alternatives.join(" OR ")));
        }
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

/// The primitive "compare field X to value Y with operator Z" translation
/// this backend contributes; everything else is shared grammar.
fn render_compare(column: &str, op: FilterOp, value: &IndexValue, q: &mut QueryBuf) -> String {
    match op {
        FilterOp::Eq => format!("{} = ${}", column, q.push_param(param_value(value))),
        FilterOp::Neq => format!("{} <> ${}", column, q.push_param(param_value(value))),
        FilterOp::Gt => format!("{} > ${}", column, q.push_param(param_value(value))),
        FilterOp::Gte => format!("{} >= ${}", column, q.push_param(param_value(value))),
        FilterOp::Lt => format!("{} < ${}", column, q.push_param(param_value(value))),
        FilterOp::Lte => format!("{} <= ${}", column, q.push_param(param_value(value))),
        FilterOp::Contains => {
            format!("{} ILIKE ${}", column, q.push_param(like_param(value, true, true)))
        }
        FilterOp::Starts => {
            format!("{} ILIKE ${}", column, q.push_param(like_param(value, false, true)))
        }
        FilterOp::Ends => {
            format!("{} ILIKE ${}", column, q.push_param(like_param(value, true, false)))
        }
        // In and IsNull never reach here; their operand shapes route above.
        FilterOp::In | FilterOp::IsNull => format!("{} = ${}", column, q.push_param(param_value(value))),
    }
}

fn render_order(contract: &ResourceContract, resolved: &ResolvedQuery) -> String {
    if resolved.sort.is_empty() {
        return format!("{} DESC", quoted(UPDATED_COLUMN));
    }
    resolved
        .sort
        .iter()
        .map(|s| format!("{} {}", quoted(&s.field.name), if s.descending { "DESC" } else { "ASC" }))
        .chain(std::iter::once(format!("{} DESC", quoted(&contract.key_field_contract().name))))
        .collect::<Vec<_>>()
        .join(", ")
}

fn param_value(value: &IndexValue) -> Value {
    match value {
        IndexValue::Text(s) => Value::String(s.clone()),
        IndexValue::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        IndexValue::Timestamp(t) => Value::String(t.to_rfc3339()),
        IndexValue::Flag(b) => Value::Bool(*b),
        IndexValue::Id(u) => Value::String(u.to_string()),
    }
}

fn like_param(value: &IndexValue, leading: bool, trailing: bool) -> Value {
    let term = match value {
        IndexValue::Text(s) => s.clone(),
        other => match param_value(other) {
            Value::String(s) => s,
            v => v.to_string(),
        },
    };
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    Value::String(format!(
        "{}{}{}",
        if leading { "%" } else { "" },
        escaped,
        if trailing { "%" } else { "" }
    ))
}

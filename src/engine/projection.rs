//! Read-shape projection: the document narrowed to readable fields, with the
//! concurrency token surfaced from the record's version.

use crate::contract::ResourceContract;
use crate::store::StoredRecord;
use serde_json::{Map, Value};

/// Projects a stored record to its read shape. Readable fields absent from
/// the document appear as explicit nulls. An explicit selection narrows the
/// shape further; the key field is always kept so the result stays addressable.
pub fn project(contract: &ResourceContract, record: &StoredRecord, selection: Option<&[String]>) -> Map<String, Value> {
    let mut out = Map::new();
    for field in &contract.fields {
        if !field.in_read {
            continue;
        }
        if let Some(names) = selection {
            let selected = field.is_key || names.iter().any(|n| n.eq_ignore_ascii_case(&field.api_name));
            if !selected {
                continue;
            }
        }
        let value = if field.is_concurrency_token {
            Value::String(record.version.clone())
        } else {
            record.document.get(&field.api_name).cloned().unwrap_or(Value::Null)
        };
        out.insert(field.api_name.clone(), value);
    }
    out
}

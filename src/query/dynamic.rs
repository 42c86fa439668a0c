//! Index-backed execution for dynamic resources: each filter becomes a
//! sub-query over the index restricted to one field, and the per-field id
//! sets are intersected.

use crate::contract::ResourceContract;
use crate::error::EngineError;
use crate::index::{self, IndexPredicate, IndexValue};
use crate::query::{FilterOp, FilterOperand, ResolvedFilter, ResolvedQuery};
use crate::store::{DocumentStore, IndexService, StoredRecord};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One page of matching records, counted before paging was applied.
#[derive(Debug)]
pub struct RecordPage {
    pub records: Vec<StoredRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

pub async fn execute(
    store: &dyn DocumentStore,
    idx: &dyn IndexService,
    contract: &ResourceContract,
    resolved: &ResolvedQuery,
) -> Result<RecordPage, EngineError> {
    let resource = contract.key.as_str();
    let mut candidates: Option<HashSet<String>> = None;

    for filter in &resolved.filters {
        let predicate = to_predicate(filter);
        let ids = idx.ids_matching(resource, &filter.field.api_name, &predicate).await?;
        candidates = Some(match candidates {
            None => ids,
            Some(previous) => previous.intersection(&ids).cloned().collect(),
        });
        if candidates.as_ref().map(HashSet::is_empty).unwrap_or(false) {
            break;
        }
    }

    if let Some((term, fields)) = &resolved.search {
        let mut hits = HashSet::new();
        if !candidates.as_ref().map(HashSet::is_empty).unwrap_or(false) {
            for field in fields {
                let matched = idx
                    .ids_matching(resource, &field.api_name, &IndexPredicate::Contains(term.clone()))
                    .await?;
                hits.extend(matched);
            }
        }
        candidates = Some(match candidates {
            None => hits,
            Some(previous) => previous.intersection(&hits).cloned().collect(),
        });
    }

    let mut records = store.list(resource, candidates.as_ref()).await?;
    let total = records.len() as u64;

    sort_records(idx, resource, resolved, &mut records).await?;

    let skip = (resolved.page as usize - 1) * resolved.page_size as usize;
    let records = records.into_iter().skip(skip).take(resolved.page_size as usize).collect();
    Ok(RecordPage { records, page: resolved.page, page_size: resolved.page_size, total })
}

/// Compound ordering: one per-field key lookup into the index, chained as
/// primary/then-by; missing keys sort last in either direction. The final
/// tie-break (and the default when no sort field survives) is most recently
/// updated first, then record id, so the order is deterministic.
async fn sort_records(
    idx: &dyn IndexService,
    resource: &str,
    resolved: &ResolvedQuery,
    records: &mut [StoredRecord],
) -> Result<(), EngineError> {
    let mut key_maps: Vec<(bool, HashMap<String, IndexValue>)> = Vec::with_capacity(resolved.sort.len());
    if !resolved.sort.is_empty() {
        let ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        for sort in &resolved.sort {
            let keys = idx.sort_keys(resource, &sort.field.api_name, &ids).await?;
            key_maps.push((sort.descending, keys));
        }
    }
    records.sort_by(|a, b| {
        for (descending, keys) in &key_maps {
            let ordering = cmp_keys(keys.get(&a.id), keys.get(&b.id), *descending);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id))
    });
    Ok(())
}

fn cmp_keys(a: Option<&IndexValue>, b: Option<&IndexValue>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            let ordering = index::cmp_values(x, y);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn to_predicate(filter: &ResolvedFilter) -> IndexPredicate {
    match (&filter.operand, filter.op) {
        (FilterOperand::Null(wants_null), _) => IndexPredicate::IsNull(*wants_null),
        (FilterOperand::Many(values), _) => IndexPredicate::In(values.clone()),
        (FilterOperand::One(value), op) => match op {
            FilterOp::Eq => IndexPredicate::Eq(value.clone()),
            FilterOp::Neq => IndexPredicate::Neq(value.clone()),
            FilterOp::Gt => IndexPredicate::Gt(value.clone()),
            FilterOp::Gte => IndexPredicate::Gte(value.clone()),
            FilterOp::Lt => IndexPredicate::Lt(value.clone()),
            FilterOp::Lte => IndexPredicate::Lte(value.clone()),
            FilterOp::Contains => IndexPredicate::Contains(text_operand(value)),
            FilterOp::Starts => IndexPredicate::StartsWith(text_operand(value)),
            FilterOp::Ends => IndexPredicate::EndsWith(text_operand(value)),
            // In and IsNull carry their own operand shapes, handled above.
            FilterOp::In | FilterOp::IsNull => IndexPredicate::Eq(value.clone()),
        },
    }
}

fn text_operand(value: &IndexValue) -> String {
    match value {
        IndexValue::Text(s) => s.clone(),
        IndexValue::Number(n) => n.to_string(),
        IndexValue::Timestamp(t) => t.to_rfc3339(),
        IndexValue::Flag(b) => b.to_string(),
        IndexValue::Id(u) => u.to_string(),
    }
}

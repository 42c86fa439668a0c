//! In-memory backend. One write guard covers the document and its index rows,
//! which is the commit boundary the trait contract requires.

use crate::contract::ResourceContract;
use crate::error::EngineError;
use crate::index::{self, IndexPredicate, IndexRow, IndexValue};
use crate::store::{DocumentStore, IndexService, StoredRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Entry {
    record: StoredRecord,
    rows: Vec<IndexRow>,
}

/// Resource → record id → entry.
type Records = HashMap<String, HashMap<String, Entry>>;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current index rows for one record, deleted or not. For inspection and tests.
    pub async fn index_rows(&self, resource: &str, id: &str) -> Vec<IndexRow> {
        self.records
            .read()
            .await
            .get(resource)
            .and_then(|m| m.get(id))
            .map(|e| e.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, resource: &str, id: &str) -> Result<Option<StoredRecord>, EngineError> {
        Ok(self
            .records
            .read()
            .await
            .get(resource)
            .and_then(|m| m.get(id))
            .filter(|e| !e.record.deleted)
            .map(|e| e.record.clone()))
    }

    async fn get_raw(&self, resource: &str, id: &str) -> Result<Option<StoredRecord>, EngineError> {
        Ok(self
            .records
            .read()
            .await
            .get(resource)
            .and_then(|m| m.get(id))
            .map(|e| e.record.clone()))
    }

    async fn list(
        &self,
        resource: &str,
        candidates: Option<&HashSet<String>>,
    ) -> Result<Vec<StoredRecord>, EngineError> {
        let records = self.records.read().await;
        let Some(by_id) = records.get(resource) else { return Ok(Vec::new()) };
        Ok(by_id
            .values()
            .filter(|e| !e.record.deleted)
            .filter(|e| candidates.map(|ids| ids.contains(&e.record.id)).unwrap_or(true))
            .map(|e| e.record.clone())
            .collect())
    }

    async fn upsert(
        &self,
        resource: &str,
        id: &str,
        document: Map<String, Value>,
        index_rows: Vec<IndexRow>,
        expected_version: Option<&str>,
    ) -> Result<StoredRecord, EngineError> {
        let mut records = self.records.write().await;
        let by_id = records.entry(resource.to_string()).or_default();
        let existing = by_id.get(id);
        if let Some(expected) = expected_version {
            let current = existing.map(|e| e.record.version.as_str());
            if current != Some(expected) {
                return Err(EngineError::ConcurrencyConflict {
                    resource: resource.to_string(),
                    id: id.to_string(),
                });
            }
        }
        let now = Utc::now();
        let created_at = existing.map(|e| e.record.created_at).unwrap_or(now);
        let record = StoredRecord {
            id: id.to_string(),
            resource: resource.to_string(),
            document,
            deleted: false,
            created_at,
            updated_at: now,
            version: Uuid::new_v4().to_string(),
        };
        by_id.insert(id.to_string(), Entry { record: record.clone(), rows: index_rows });
        Ok(record)
    }

    async fn soft_delete(&self, resource: &str, id: &str) -> Result<bool, EngineError> {
        let mut records = self.records.write().await;
        let Some(entry) = records.get_mut(resource).and_then(|m| m.get_mut(id)) else {
            return Ok(false);
        };
        if entry.record.deleted {
            return Ok(false);
        }
        entry.record.deleted = true;
        Ok(true)
    }

    async fn hard_delete(&self, resource: &str, id: &str) -> Result<bool, EngineError> {
        let mut records = self.records.write().await;
        Ok(records.get_mut(resource).map(|m| m.remove(id).is_some()).unwrap_or(false))
    }
}

#[async_trait]
impl IndexService for MemoryStore {
    async fn rebuild_index(
        &self,
        resource: &str,
        id: &str,
        contract: &ResourceContract,
        document: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        let mut records = self.records.write().await;
        let entry = records
            .get_mut(resource)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| EngineError::NotFound(format!("record '{}/{}'", resource, id)))?;
        entry.rows = index::project_rows(contract, document);
        Ok(())
    }

    async fn ids_matching(
        &self,
        resource: &str,
        field: &str,
        predicate: &IndexPredicate,
    ) -> Result<HashSet<String>, EngineError> {
        let records = self.records.read().await;
        let Some(by_id) = records.get(resource) else { return Ok(HashSet::new()) };
        Ok(by_id
            .values()
            .filter(|e| !e.record.deleted)
            .filter(|e| {
                let value = e.rows.iter().find(|r| r.field == field).map(|r| &r.value);
                index::matches(predicate, value)
            })
            .map(|e| e.record.id.clone())
            .collect())
    }

    async fn sort_keys(
        &self,
        resource: &str,
        field: &str,
        ids: &HashSet<String>,
    ) -> Result<HashMap<String, IndexValue>, EngineError> {
        let records = self.records.read().await;
        let Some(by_id) = records.get(resource) else { return Ok(HashMap::new()) };
        Ok(ids
            .iter()
            .filter_map(|id| {
                by_id
                    .get(id)
                    .and_then(|e| e.rows.iter().find(|r| r.field == field))
                    .map(|r| (id.clone(), r.value.clone()))
            })
            .collect())
    }
}

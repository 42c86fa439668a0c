//! Storage boundary: one document row per record plus its typed index rows.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{engine_schema, ensure_engine_tables, PgStore};

use crate::contract::ResourceContract;
use crate::error::EngineError;
use crate::index::{IndexPredicate, IndexRow, IndexValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// One persisted record. The id is string-typed regardless of the logical key
/// type so int, guid, and string keys share one schema.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub id: String,
    pub resource: String,
    pub document: Map<String, Value>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Opaque token compared on optimistic writes; regenerated on every commit.
    pub version: String,
}

/// Document persistence keyed by (resource, record id). Reads apply the
/// non-deleted filter implicitly; `get_raw` is the maintenance escape hatch.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, resource: &str, id: &str) -> Result<Option<StoredRecord>, EngineError>;

    /// Non-deleted records, optionally restricted to a candidate-id set
    /// produced by the index layer. Order is unspecified; callers sort.
    async fn list(
        &self,
        resource: &str,
        candidates: Option<&HashSet<String>>,
    ) -> Result<Vec<StoredRecord>, EngineError>;

    /// Persists the document and replaces the record's index rows in one
    /// commit, so no reader can observe one without the other. With
    /// `expected_version` set, the write fails with a concurrency conflict
    /// unless the stored version still matches.
    async fn upsert(
        &self,
        resource: &str,
        id: &str,
        document: Map<String, Value>,
        index_rows: Vec<IndexRow>,
        expected_version: Option<&str>,
    ) -> Result<StoredRecord, EngineError>;

    /// Sets the delete flag; the document and its index rows are retained.
    async fn soft_delete(&self, resource: &str, id: &str) -> Result<bool, EngineError>;

    /// Removes the document row and its index rows.
    async fn hard_delete(&self, resource: &str, id: &str) -> Result<bool, EngineError>;

    /// Row fetch without the non-deleted filter.
    async fn get_raw(&self, resource: &str, id: &str) -> Result<Option<StoredRecord>, EngineError>;
}

/// Query side of the secondary index, plus out-of-band reindexing.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Replaces all index rows for one record with the projection of
    /// `document` under `contract`. Used when a contract change alters the
    /// filterable/sortable set; regular writes rebuild through
    /// [`DocumentStore::upsert`] instead so the pair commits atomically.
    async fn rebuild_index(
        &self,
        resource: &str,
        id: &str,
        contract: &ResourceContract,
        document: &Map<String, Value>,
    ) -> Result<(), EngineError>;

    /// Ids of non-deleted records whose indexed value for `field` satisfies
    /// the predicate.
    async fn ids_matching(
        &self,
        resource: &str,
        field: &str,
        predicate: &IndexPredicate,
    ) -> Result<HashSet<String>, EngineError>;

    /// Per-record sort key for `field`, restricted to `ids`. Records without
    /// a row for the field are absent from the result and sort last.
    async fn sort_keys(
        &self,
        resource: &str,
        field: &str,
        ids: &HashSet<String>,
    ) -> Result<HashMap<String, IndexValue>, EngineError>;
}

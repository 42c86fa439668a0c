//! Contract resolution with a staleness-checked cache.

use crate::contract::builder;
use crate::contract::model::ResourceContract;
use crate::contract::types::ResourceDefinition;
use crate::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// External collaborator supplying raw resource definitions.
#[async_trait]
pub trait RawDefinitionStore: Send + Sync {
    async fn get_by_key(&self, key: &str) -> Result<Option<ResourceDefinition>, EngineError>;
    async fn get_by_route(&self, route: &str) -> Result<Option<ResourceDefinition>, EngineError>;
    async fn get_all(&self) -> Result<Vec<ResourceDefinition>, EngineError>;
    /// When the definition for `key` last changed. `None` when the store cannot say.
    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, EngineError>;
}

struct CacheEntry {
    contract: Arc<ResourceContract>,
    /// The definition timestamp the entry was built from, not wall-clock:
    /// an entry is never considered fresher than the data behind it.
    built_from: Option<DateTime<Utc>>,
}

/// Resolves contracts by key or route, rebuilding when the definition store
/// reports a newer last-modified timestamp. Concurrent first-access may rebuild
/// redundantly; the builder is pure and cheap, so no rebuild lock is taken.
pub struct ContractProvider {
    definitions: Arc<dyn RawDefinitionStore>,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl ContractProvider {
    pub fn new(definitions: Arc<dyn RawDefinitionStore>) -> Self {
        ContractProvider { definitions, cache: RwLock::new(HashMap::new()) }
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Arc<ResourceContract>, EngineError> {
        let current = self.definitions.last_modified(key).await?;
        if let Some(entry) = self.cache.read().await.get(key) {
            if is_fresh(entry.built_from, current) {
                return Ok(entry.contract.clone());
            }
        }
        // The timestamp was read before the definition, so the entry can only
        // understate freshness and a later lookup re-checks.
        let definition = self
            .definitions
            .get_by_key(key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("resource '{}'", key)))?;
        let contract = Arc::new(builder::build(&definition));
        tracing::debug!(resource = %key, "contract rebuilt");
        self.cache
            .write()
            .await
            .insert(key.to_string(), CacheEntry { contract: contract.clone(), built_from: current });
        Ok(contract)
    }

    pub async fn get_by_route(&self, route: &str) -> Result<Arc<ResourceContract>, EngineError> {
        let definition = self
            .definitions
            .get_by_route(route)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("route '{}'", route)))?;
        // Cache entries are keyed by resource key regardless of how they were resolved.
        self.get_by_key(&definition.key).await
    }

    pub async fn all(&self) -> Result<Vec<Arc<ResourceContract>>, EngineError> {
        let definitions = self.definitions.get_all().await?;
        let mut contracts = Vec::with_capacity(definitions.len());
        for definition in definitions {
            contracts.push(self.get_by_key(&definition.key).await?);
        }
        Ok(contracts)
    }

    pub async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.definitions.last_modified(key).await
    }

    /// Drops the cached entry so the next lookup rebuilds unconditionally.
    pub async fn invalidate(&self, key: &str) {
        self.cache.write().await.remove(key);
    }
}

fn is_fresh(built_from: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (built_from, current) {
        (Some(built), Some(current)) => built >= current,
        (None, None) => true,
        _ => false,
    }
}

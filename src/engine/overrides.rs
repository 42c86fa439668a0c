//! Per-(resource, operation) replacement handlers. An override fully replaces
//! the default path body; global before/after hooks still run around it.

use crate::contract::{Operation, ResourceContract};
use crate::error::EngineError;
use crate::query::ListQuery;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Everything the default path would have received.
pub struct OverrideContext {
    pub contract: Arc<ResourceContract>,
    pub operation: Operation,
    pub record_id: Option<String>,
    pub payload: Option<Map<String, Value>>,
    pub query: Option<ListQuery>,
    pub hard_delete: bool,
}

pub type OverrideFuture = Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send>>;
pub type OverrideFn = Arc<dyn Fn(OverrideContext) -> OverrideFuture + Send + Sync>;

#[derive(Default)]
pub struct OverrideRegistry {
    handlers: HashMap<(String, Operation), OverrideFn>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last registration per (resource, operation) wins.
    pub fn register(&mut self, resource: &str, operation: Operation, handler: OverrideFn) {
        self.handlers.insert((resource.to_string(), operation), handler);
    }

    pub fn get(&self, resource: &str, operation: Operation) -> Option<OverrideFn> {
        self.handlers.get(&(resource.to_string(), operation)).cloned()
    }
}

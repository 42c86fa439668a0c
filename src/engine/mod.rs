//! CRUD orchestration: enablement check → global before hooks → override or
//! default path → global after hooks, with resource-scoped hooks inside the
//! default path. Any hook or validation failure aborts the remaining pipeline;
//! there is no partial commit and no automatic retry.

pub mod hooks;
pub mod overrides;
pub mod projection;
pub mod validation;

pub use hooks::{HookContext, HookDispatcher, HookFn, HookFuture, HookScope, HookStage};
pub use overrides::{OverrideContext, OverrideFn, OverrideFuture, OverrideRegistry};

use crate::contract::{
    BackendKind, ContractProvider, FieldType, Operation, RelationKind, RelationWriteMode, ResourceContract,
};
use crate::error::{EngineError, ValidationErrors};
use crate::index;
use crate::query::{self, dynamic, ListQuery};
use crate::store::{DocumentStore, IndexService, StoredRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Read-time options shared by get (and list via [`ListQuery`]).
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    pub expand: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListResult {
    pub items: Vec<Value>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

pub struct ResourceEngine {
    provider: Arc<ContractProvider>,
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn IndexService>,
    hooks: HookDispatcher,
    overrides: OverrideRegistry,
}

impl ResourceEngine {
    pub fn new(
        provider: Arc<ContractProvider>,
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn IndexService>,
    ) -> Self {
        ResourceEngine {
            provider,
            store,
            index,
            hooks: HookDispatcher::new(),
            overrides: OverrideRegistry::new(),
        }
    }

    /// Register hooks before the engine is shared; dispatch itself is `&self`.
    pub fn hooks_mut(&mut self) -> &mut HookDispatcher {
        &mut self.hooks
    }

    pub fn overrides_mut(&mut self) -> &mut OverrideRegistry {
        &mut self.overrides
    }

    pub fn provider(&self) -> &Arc<ContractProvider> {
        &self.provider
    }

    pub async fn list(&self, resource: &str, query: &ListQuery) -> Result<ListResult, EngineError> {
        let contract = self.contract_for(resource, Operation::List).await?;
        let mut ctx = HookContext::new(resource, Operation::List);
        self.hooks.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await?;

        let result = if let Some(handler) = self.overrides.get(resource, Operation::List) {
            let value = handler(OverrideContext {
                contract: contract.clone(),
                operation: Operation::List,
                record_id: None,
                payload: None,
                query: Some(query.clone()),
                hard_delete: false,
            })
            .await?;
            list_result_from(value)?
        } else {
            self.list_default(&contract, query).await?
        };

        ctx.result = Some(serde_json::to_value(&result).unwrap_or(Value::Null));
        self.hooks.dispatch(HookStage::After, HookScope::Global, &mut ctx).await?;
        list_result_from(ctx.result.take().unwrap_or(Value::Null))
    }

    pub async fn get(&self, resource: &str, id: &str, options: &ReadOptions) -> Result<Option<Value>, EngineError> {
        let contract = self.contract_for(resource, Operation::Get).await?;
        let mut ctx = HookContext::new(resource, Operation::Get);
        ctx.record_id = Some(id.to_string());
        self.hooks.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await?;

        ctx.result = if let Some(handler) = self.overrides.get(resource, Operation::Get) {
            let value = handler(OverrideContext {
                contract: contract.clone(),
                operation: Operation::Get,
                record_id: Some(id.to_string()),
                payload: None,
                query: None,
                hard_delete: false,
            })
            .await?;
            (!value.is_null()).then_some(value)
        } else {
            self.get_default(&contract, id, options).await?
        };

        self.hooks.dispatch(HookStage::After, HookScope::Global, &mut ctx).await?;
        Ok(ctx.result.take())
    }

    pub async fn create(&self, resource: &str, payload: Map<String, Value>) -> Result<Value, EngineError> {
        let contract = self.contract_for(resource, Operation::Create).await?;
        let mut ctx = HookContext::new(resource, Operation::Create);
        ctx.payload = Some(payload);
        self.hooks.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await?;
        let payload = ctx.payload.take().unwrap_or_default();

        let result = if let Some(handler) = self.overrides.get(resource, Operation::Create) {
            handler(OverrideContext {
                contract: contract.clone(),
                operation: Operation::Create,
                record_id: None,
                payload: Some(payload),
                query: None,
                hard_delete: false,
            })
            .await?
        } else {
            self.create_default(&contract, payload).await?
        };

        ctx.result = Some(result);
        self.hooks.dispatch(HookStage::After, HookScope::Global, &mut ctx).await?;
        Ok(ctx.result.take().unwrap_or(Value::Null))
    }

    pub async fn update(&self, resource: &str, id: &str, payload: Map<String, Value>) -> Result<Value, EngineError> {
        let contract = self.contract_for(resource, Operation::Update).await?;
        let mut ctx = HookContext::new(resource, Operation::Update);
        ctx.record_id = Some(id.to_string());
        ctx.payload = Some(payload);
        self.hooks.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await?;
        let payload = ctx.payload.take().unwrap_or_default();

        let result = if let Some(handler) = self.overrides.get(resource, Operation::Update) {
            handler(OverrideContext {
                contract: contract.clone(),
                operation: Operation::Update,
                record_id: Some(id.to_string()),
                payload: Some(payload),
                query: None,
                hard_delete: false,
            })
            .await?
        } else {
            self.update_default(&contract, id, payload).await?
        };

        ctx.result = Some(result);
        self.hooks.dispatch(HookStage::After, HookScope::Global, &mut ctx).await?;
        Ok(ctx.result.take().unwrap_or(Value::Null))
    }

    pub async fn delete(&self, resource: &str, id: &str, hard: bool) -> Result<(), EngineError> {
        let contract = self.contract_for(resource, Operation::Delete).await?;
        let mut ctx = HookContext::new(resource, Operation::Delete);
        ctx.record_id = Some(id.to_string());
        self.hooks.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await?;

        if let Some(handler) = self.overrides.get(resource, Operation::Delete) {
            handler(OverrideContext {
                contract: contract.clone(),
                operation: Operation::Delete,
                record_id: Some(id.to_string()),
                payload: None,
                query: None,
                hard_delete: hard,
            })
            .await?;
        } else {
            self.delete_default(&contract, id, hard).await?;
        }

        self.hooks.dispatch(HookStage::After, HookScope::Global, &mut ctx).await?;
        Ok(())
    }

    async fn contract_for(&self, resource: &str, operation: Operation) -> Result<Arc<ResourceContract>, EngineError> {
        let contract = self.provider.get_by_key(resource).await?;
        let enabled = contract.operation(operation).map(|o| o.enabled).unwrap_or(false);
        if !enabled {
            return Err(EngineError::OperationDisabled { resource: resource.to_string(), operation });
        }
        Ok(contract)
    }

    fn ensure_dynamic(&self, contract: &ResourceContract) -> Result<(), EngineError> {
        if contract.backend != BackendKind::Dynamic {
            return Err(EngineError::Unsupported(format!(
                "resource '{}' uses the relational backend; its execution lives outside this engine",
                contract.key
            )));
        }
        Ok(())
    }

    async fn list_default(&self, contract: &ResourceContract, query: &ListQuery) -> Result<ListResult, EngineError> {
        self.ensure_dynamic(contract)?;
        let resolved = query::resolve(contract, query)?;
        let page = dynamic::execute(self.store.as_ref(), self.index.as_ref(), contract, &resolved).await?;
        let expand = effective_expand(contract, query.expand.as_deref());

        let mut items = Vec::with_capacity(page.records.len());
        for record in &page.records {
            let mut shape = projection::project(contract, record, query.fields.as_deref());
            self.expand_into(contract, &record.document, &mut shape, &expand, 1).await?;
            items.push(self.run_record_hook(contract, Operation::List, record, shape).await?);
        }
        Ok(ListResult { items, page: page.page, page_size: page.page_size, total: page.total })
    }

    async fn get_default(
        &self,
        contract: &ResourceContract,
        id: &str,
        options: &ReadOptions,
    ) -> Result<Option<Value>, EngineError> {
        self.ensure_dynamic(contract)?;
        let Some(record) = self.store.get(&contract.key, id).await? else {
            return Ok(None);
        };
        let mut shape = projection::project(contract, &record, options.fields.as_deref());
        let expand = effective_expand(contract, options.expand.as_deref());
        self.expand_into(contract, &record.document, &mut shape, &expand, 1).await?;
        Ok(Some(self.run_record_hook(contract, Operation::Get, &record, shape).await?))
    }

    async fn create_default(&self, contract: &ResourceContract, payload: Map<String, Value>) -> Result<Value, EngineError> {
        self.ensure_dynamic(contract)?;
        validation::validate_create(contract, &payload)?;

        let mut rctx = HookContext::new(&contract.key, Operation::Create);
        rctx.payload = Some(payload);
        self.hooks.dispatch(HookStage::Before, HookScope::Resource, &mut rctx).await?;
        let payload = rctx.payload.take().unwrap_or_default();

        let id = resolve_create_id(contract, &payload)?;
        self.check_relation_targets(contract, &payload).await?;

        let mut document = Map::new();
        for field in &contract.fields {
            if !field.in_create {
                continue;
            }
            if let Some(value) = lookup(&payload, &field.api_name) {
                document.insert(field.api_name.clone(), value.clone());
            } else if let Some(default) = &field.default {
                document.insert(field.api_name.clone(), default.clone());
            }
        }
        for relation in &contract.relations {
            if relation.write == RelationWriteMode::Disabled {
                continue;
            }
            if let Some(value) = lookup(&payload, &relation.write_field) {
                document.insert(relation.write_field.clone(), value.clone());
            }
        }
        document.insert(contract.key_field.clone(), key_json(&id, contract.key_type));

        let rows = index::project_rows(contract, &document);
        let record = self.store.upsert(&contract.key, &id, document, rows, None).await?;
        tracing::debug!(resource = %contract.key, id = %id, "created");

        let shape = projection::project(contract, &record, None);
        self.run_record_hook(contract, Operation::Create, &record, shape).await
    }

    async fn update_default(
        &self,
        contract: &ResourceContract,
        id: &str,
        payload: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        self.ensure_dynamic(contract)?;
        validation::validate_update(contract, &payload)?;

        let mut rctx = HookContext::new(&contract.key, Operation::Update);
        rctx.record_id = Some(id.to_string());
        rctx.payload = Some(payload);
        self.hooks.dispatch(HookStage::Before, HookScope::Resource, &mut rctx).await?;
        let payload = rctx.payload.take().unwrap_or_default();

        let existing = self
            .store
            .get(&contract.key, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("record '{}/{}'", contract.key, id)))?;

        if let Some(cc) = contract.concurrency() {
            if let Some(token) = lookup(&payload, &cc.token_field).and_then(Value::as_str) {
                if token != existing.version {
                    return Err(EngineError::ConcurrencyConflict {
                        resource: contract.key.clone(),
                        id: id.to_string(),
                    });
                }
            }
        }
        self.check_relation_targets(contract, &payload).await?;

        // Patch semantics: fields absent from the payload are left untouched.
        let token_field = contract.concurrency().map(|c| c.token_field.clone());
        let mut document = existing.document.clone();
        for field in &contract.fields {
            if !field.in_update {
                continue;
            }
            if token_field.as_deref().map(|t| t.eq_ignore_ascii_case(&field.api_name)).unwrap_or(false) {
                continue;
            }
            if let Some(value) = lookup(&payload, &field.api_name) {
                document.insert(field.api_name.clone(), value.clone());
            }
        }
        for relation in &contract.relations {
            if relation.write == RelationWriteMode::Disabled {
                continue;
            }
            if let Some(value) = lookup(&payload, &relation.write_field) {
                document.insert(relation.write_field.clone(), value.clone());
            }
        }
        // The key is never altered by a client-supplied value.
        document.insert(contract.key_field.clone(), key_json(&existing.id, contract.key_type));

        let rows = index::project_rows(contract, &document);
        let record = self
            .store
            .upsert(&contract.key, id, document, rows, Some(&existing.version))
            .await?;
        tracing::debug!(resource = %contract.key, id = %id, "updated");

        let shape = projection::project(contract, &record, None);
        self.run_record_hook(contract, Operation::Update, &record, shape).await
    }

    async fn delete_default(&self, contract: &ResourceContract, id: &str, hard: bool) -> Result<(), EngineError> {
        self.ensure_dynamic(contract)?;
        let existing = self
            .store
            .get(&contract.key, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("record '{}/{}'", contract.key, id)))?;

        let mut rctx = HookContext::new(&contract.key, Operation::Delete);
        rctx.record_id = Some(existing.id.clone());
        self.hooks.dispatch(HookStage::Before, HookScope::Resource, &mut rctx).await?;

        if hard {
            self.store.hard_delete(&contract.key, id).await?;
        } else {
            // Index rows stay; the deleted flag filters the record out of reads.
            self.store.soft_delete(&contract.key, id).await?;
        }
        tracing::debug!(resource = %contract.key, id = %id, hard, "deleted");

        self.hooks.dispatch(HookStage::After, HookScope::Resource, &mut rctx).await?;
        Ok(())
    }

    /// Resource-scoped after hooks see (and may rewrite) each projected
    /// record: per item on list, once on get, and on the write paths.
    async fn run_record_hook(
        &self,
        contract: &ResourceContract,
        operation: Operation,
        record: &StoredRecord,
        shape: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        let mut ctx = HookContext::new(&contract.key, operation);
        ctx.record_id = Some(record.id.clone());
        ctx.result = Some(Value::Object(shape));
        self.hooks.dispatch(HookStage::After, HookScope::Resource, &mut ctx).await?;
        Ok(ctx.result.take().unwrap_or(Value::Null))
    }

    /// Existence check for relation writes. Targets on another backend are
    /// rejected loudly rather than silently skipped.
    async fn check_relation_targets(
        &self,
        contract: &ResourceContract,
        payload: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        let mut errors = ValidationErrors::new();
        for relation in &contract.relations {
            if relation.write == RelationWriteMode::Disabled {
                continue;
            }
            let Some(value) = lookup(payload, &relation.write_field) else { continue };
            if value.is_null() {
                continue;
            }
            let target = self.provider.get_by_key(&relation.target).await?;
            if target.backend != contract.backend {
                return Err(EngineError::Unsupported(format!(
                    "relation '{}' crosses backends ('{}' -> '{}')",
                    relation.api_name, contract.key, target.key
                )));
            }
            match relation.write {
                RelationWriteMode::ById => match value_to_id_text(value) {
                    Some(fk) => {
                        if self.store.get(&target.key, &fk).await?.is_none() {
                            errors.push(relation.write_field.as_str(), "Referenced record not found.");
                        }
                    }
                    None => errors.push(relation.write_field.as_str(), "Expected a record id."),
                },
                RelationWriteMode::ByIdList => match value.as_array() {
                    Some(entries) => {
                        for entry in entries {
                            match value_to_id_text(entry) {
                                Some(fk) => {
                                    if self.store.get(&target.key, &fk).await?.is_none() {
                                        errors.push(relation.write_field.as_str(), "Referenced record not found.");
                                    }
                                }
                                None => errors.push(relation.write_field.as_str(), "Expected a record id."),
                            }
                        }
                    }
                    None => errors.push(relation.write_field.as_str(), "Expected a list of record ids."),
                },
                RelationWriteMode::Disabled => {}
            }
        }
        errors.into_result()
    }

    /// Embeds expanded relations into an already-projected shape. Foreign keys
    /// are read from the stored document, so the FK property does not need to
    /// be part of the read shape. Unknown or non-expandable names are dropped.
    fn expand_into<'a>(
        &'a self,
        contract: &'a ResourceContract,
        source: &'a Map<String, Value>,
        out: &'a mut Map<String, Value>,
        expand: &'a [String],
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            if expand.is_empty() || depth > contract.read.max_expand_depth {
                return Ok(());
            }
            for name in expand {
                let Some(relation) = contract.relation(name) else { continue };
                if !contract.read.expandable.contains(&relation.api_name) {
                    continue;
                }
                let target = self.provider.get_by_key(&relation.target).await?;
                if target.backend != contract.backend {
                    return Err(EngineError::Unsupported(format!(
                        "relation '{}' crosses backends ('{}' -> '{}')",
                        relation.api_name, contract.key, target.key
                    )));
                }
                let value = match relation.kind {
                    RelationKind::ToOne => {
                        match source.get(&relation.write_field).and_then(value_to_id_text) {
                            None => Value::Null,
                            Some(fk) => match self.store.get(&target.key, &fk).await? {
                                None => Value::Null,
                                Some(record) => {
                                    Value::Object(self.expanded_shape(&target, &record, depth + 1).await?)
                                }
                            },
                        }
                    }
                    RelationKind::ToMany => {
                        let mut shapes = Vec::new();
                        let ids = source
                            .get(&relation.write_field)
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        for entry in &ids {
                            let Some(fk) = value_to_id_text(entry) else { continue };
                            if let Some(record) = self.store.get(&target.key, &fk).await? {
                                shapes.push(Value::Object(self.expanded_shape(&target, &record, depth + 1).await?));
                            }
                        }
                        Value::Array(shapes)
                    }
                };
                out.insert(relation.api_name.clone(), value);
            }
            Ok(())
        })
    }

    /// A related record's read shape with its own default expansions applied.
    async fn expanded_shape(
        &self,
        contract: &ResourceContract,
        record: &StoredRecord,
        depth: u32,
    ) -> Result<Map<String, Value>, EngineError> {
        let mut shape = projection::project(contract, record, None);
        let nested: Vec<String> = contract.read.default_expanded.iter().cloned().collect();
        self.expand_into(contract, &record.document, &mut shape, &nested, depth).await?;
        Ok(shape)
    }
}

fn effective_expand(contract: &ResourceContract, explicit: Option<&[String]>) -> Vec<String> {
    match explicit {
        Some(names) => names.to_vec(),
        None => contract.read.default_expanded.iter().cloned().collect(),
    }
}

fn resolve_create_id(contract: &ResourceContract, payload: &Map<String, Value>) -> Result<String, EngineError> {
    if let Some(value) = lookup(payload, &contract.key_field).filter(|v| !v.is_null()) {
        return id_from_value(contract, value);
    }
    if contract.key_type.supports_generation() {
        return Ok(Uuid::new_v4().to_string());
    }
    Err(EngineError::Validation(ValidationErrors::single(
        contract.key_field.as_str(),
        "Key is required; no auto-generation is configured for this key type.",
    )))
}

fn id_from_value(contract: &ResourceContract, value: &Value) -> Result<String, EngineError> {
    let invalid = || {
        EngineError::Validation(ValidationErrors::single(contract.key_field.as_str(), "Invalid key value."))
    };
    match contract.key_type {
        FieldType::Guid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(|u| u.to_string())
            .ok_or_else(invalid),
        FieldType::Int32 | FieldType::Int64 => value
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()).map(|i| i.to_string()))
            .ok_or_else(invalid),
        _ => value.as_str().map(str::to_string).filter(|s| !s.is_empty()).ok_or_else(invalid),
    }
}

/// The key as it appears inside the document, matching the logical key type.
fn key_json(id: &str, key_type: FieldType) -> Value {
    match key_type {
        FieldType::Int32 | FieldType::Int64 => id
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .unwrap_or_else(|_| Value::String(id.to_string())),
        _ => Value::String(id.to_string()),
    }
}

fn lookup<'a>(payload: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    payload
        .get(name)
        .or_else(|| payload.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}

fn value_to_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => n.as_i64().map(|i| i.to_string()),
        _ => None,
    }
}

fn list_result_from(value: Value) -> Result<ListResult, EngineError> {
    serde_json::from_value(value)
        .map_err(|e| EngineError::Unsupported(format!("list result has an unexpected shape: {}", e)))
}

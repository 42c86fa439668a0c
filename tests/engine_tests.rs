//! End-to-end orchestrator tests against the in-memory backend.

use async_trait::async_trait;
use blueprint_engine::contract::{
    BackendKind, FieldDefinition, FieldType, KeyDefinition, RelationDefinition, RelationKind, RelationWriteMode,
    ResourceDefinition, ValidationRule,
};
use blueprint_engine::engine::{HookStage, ReadOptions};
use blueprint_engine::{
    ContractProvider, DocumentStore, EngineError, IndexService, ListQuery, MemoryStore, Operation,
    RawDefinitionStore, ResourceEngine,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

struct StaticDefinitions {
    inner: RwLock<(HashMap<String, ResourceDefinition>, DateTime<Utc>)>,
}

impl StaticDefinitions {
    fn new(definitions: Vec<ResourceDefinition>) -> Self {
        let map = definitions.into_iter().map(|d| (d.key.clone(), d)).collect();
        StaticDefinitions { inner: RwLock::new((map, Utc::now())) }
    }

    async fn replace(&self, definition: ResourceDefinition, bump_timestamp: bool) {
        let mut inner = self.inner.write().await;
        inner.0.insert(definition.key.clone(), definition);
        if bump_timestamp {
            inner.1 = Utc::now() + chrono::Duration::milliseconds(1);
        }
    }
}

#[async_trait]
impl RawDefinitionStore for StaticDefinitions {
    async fn get_by_key(&self, key: &str) -> Result<Option<ResourceDefinition>, EngineError> {
        Ok(self.inner.read().await.0.get(key).cloned())
    }

    async fn get_by_route(&self, route: &str) -> Result<Option<ResourceDefinition>, EngineError> {
        Ok(self.inner.read().await.0.values().find(|d| d.route == route).cloned())
    }

    async fn get_all(&self) -> Result<Vec<ResourceDefinition>, EngineError> {
        Ok(self.inner.read().await.0.values().cloned().collect())
    }

    async fn last_modified(&self, _key: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(Some(self.inner.read().await.1))
    }
}

struct TestBed {
    engine: ResourceEngine,
    store: Arc<MemoryStore>,
    definitions: Arc<StaticDefinitions>,
}

fn bed_with(definitions: Vec<ResourceDefinition>) -> TestBed {
    let definitions = Arc::new(StaticDefinitions::new(definitions));
    let provider = Arc::new(ContractProvider::new(definitions.clone()));
    let store = Arc::new(MemoryStore::new());
    let engine = ResourceEngine::new(provider, store.clone(), store.clone());
    TestBed { engine, store, definitions }
}

fn field(name: &str, type_: FieldType) -> FieldDefinition {
    FieldDefinition {
        name: name.into(),
        api_name: None,
        type_,
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
        validation: ValidationRule::default(),
    }
}

fn base_def(key: &str, fields: Vec<FieldDefinition>) -> ResourceDefinition {
    ResourceDefinition {
        key: key.into(),
        route: key.into(),
        backend: BackendKind::Dynamic,
        key_field: KeyDefinition { name: "id".into(), type_: FieldType::Guid },
        max_page_size: Some(25),
        max_expand_depth: None,
        default_sort: None,
        operations: None,
        require_concurrency_token: true,
        fields,
        relations: Vec::new(),
        policies: HashMap::new(),
    }
}

fn tasks_def() -> ResourceDefinition {
    let mut title = field("title", FieldType::String);
    title.filterable = true;
    title.sortable = true;
    title.searchable = true;
    title.validation.required = Some(true);
    let mut done = field("done", FieldType::Boolean);
    done.filterable = true;
    done.sortable = true;
    let mut priority = field("priority", FieldType::Int32);
    priority.filterable = true;
    priority.sortable = true;
    priority.validation.minimum = Some(0.0);
    priority.validation.maximum = Some(10.0);
    let mut secret = field("secret", FieldType::String);
    secret.hidden = true;
    base_def("tasks", vec![title, done, priority, secret])
}

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("test payloads are objects")
}

fn filter_query(pairs: &[(&str, &str)]) -> ListQuery {
    let mut query = ListQuery::default();
    for (name, raw) in pairs {
        query.filter.insert(name.to_string(), raw.to_string());
    }
    query
}

fn id_of(record: &Value) -> String {
    record["id"].as_str().expect("key field present").to_string()
}

async fn settle() {
    // Keeps updated_at timestamps strictly ordered for default-sort assertions.
    tokio::time::sleep(Duration::from_millis(3)).await;
}

#[tokio::test]
async fn create_then_get_round_trips_the_read_shape() {
    let bed = bed_with(vec![tasks_def()]);
    let created = bed
        .engine
        .create("tasks", obj(json!({"title": "buy milk", "done": true, "priority": 3})))
        .await
        .unwrap();
    let id = id_of(&created);

    let fetched = bed.engine.get("tasks", &id, &ReadOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetched["title"], json!("buy milk"));
    assert_eq!(fetched["done"], json!(true));
    assert_eq!(fetched["priority"], json!(3));
    assert_eq!(fetched["id"], json!(id));
    assert!(fetched.get("secret").is_none());
}

#[tokio::test]
async fn guid_keys_auto_generate_and_absent_fields_project_as_null() {
    let bed = bed_with(vec![tasks_def()]);
    let created = bed.engine.create("tasks", obj(json!({"title": "buy milk"}))).await.unwrap();
    assert!(uuid::Uuid::parse_str(&id_of(&created)).is_ok());
    assert_eq!(created["title"], json!("buy milk"));
    assert_eq!(created["done"], Value::Null);
}

#[tokio::test]
async fn bool_filter_returns_exactly_the_matching_records() {
    let bed = bed_with(vec![tasks_def()]);
    for (title, done) in [("a", true), ("b", false), ("c", true)] {
        bed.engine.create("tasks", obj(json!({"title": title, "done": done}))).await.unwrap();
        settle().await;
    }
    let result = bed.engine.list("tasks", &filter_query(&[("done", "eq:true")])).await.unwrap();
    assert_eq!(result.total, 2);
    assert!(result.items.iter().all(|i| i["done"] == json!(true)));

    // Bare values imply eq.
    let bare = bed.engine.list("tasks", &filter_query(&[("done", "false")])).await.unwrap();
    assert_eq!(bare.total, 1);
}

#[tokio::test]
async fn unknown_filter_fields_change_nothing() {
    let bed = bed_with(vec![tasks_def()]);
    for title in ["a", "b", "c"] {
        bed.engine.create("tasks", obj(json!({"title": title}))).await.unwrap();
    }
    let unfiltered = bed.engine.list("tasks", &ListQuery::default()).await.unwrap();
    let filtered = bed
        .engine
        .list("tasks", &filter_query(&[("nonexistent", "eq:x"), ("secret", "eq:x")]))
        .await
        .unwrap();
    assert_eq!(filtered.total, unfiltered.total);
}

#[tokio::test]
async fn immutable_field_updates_are_rejected_and_nothing_is_written() {
    let mut def = tasks_def();
    def.fields[0].immutable = true; // title
    let bed = bed_with(vec![def]);
    let created = bed.engine.create("tasks", obj(json!({"title": "original"}))).await.unwrap();
    let id = id_of(&created);

    let err = bed.engine.update("tasks", &id, obj(json!({"title": "new"}))).await.unwrap_err();
    let validation = err.validation().expect("validation error");
    assert_eq!(validation.messages("title"), ["Field is immutable."]);

    let fetched = bed.engine.get("tasks", &id, &ReadOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetched["title"], json!("original"));
}

#[tokio::test]
async fn concurrency_tokens_gate_updates() {
    let mut def = tasks_def();
    let mut version = field("version", FieldType::String);
    version.immutable = true;
    version.in_create = false;
    version.concurrency_token = true;
    def.fields.push(version);
    let bed = bed_with(vec![def]);

    let created = bed.engine.create("tasks", obj(json!({"title": "v1"}))).await.unwrap();
    let id = id_of(&created);
    let token = created["version"].as_str().unwrap().to_string();

    // Missing token: validation error before any store access.
    let err = bed.engine.update("tasks", &id, obj(json!({"title": "v2"}))).await.unwrap_err();
    assert_eq!(err.validation().unwrap().messages("version"), ["Concurrency token is required."]);

    // Stale token: conflict.
    let err = bed
        .engine
        .update("tasks", &id, obj(json!({"title": "v2", "version": "stale"})))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));

    // Current token: the write lands and the token rotates.
    let updated = bed
        .engine
        .update("tasks", &id, obj(json!({"title": "v2", "version": token.clone()})))
        .await
        .unwrap();
    assert_eq!(updated["title"], json!("v2"));
    let fetched = bed.engine.get("tasks", &id, &ReadOptions::default()).await.unwrap().unwrap();
    assert_ne!(fetched["version"], json!(token));
}

#[tokio::test]
async fn compound_sort_orders_descending_then_ascending() {
    let bed = bed_with(vec![tasks_def()]);
    for (title, done) in [("b", true), ("a", true), ("c", false), ("a", false)] {
        bed.engine.create("tasks", obj(json!({"title": title, "done": done}))).await.unwrap();
        settle().await;
    }
    let query = ListQuery { sort: Some("-done,title".into()), ..Default::default() };
    let result = bed.engine.list("tasks", &query).await.unwrap();
    let order: Vec<(String, bool)> = result
        .items
        .iter()
        .map(|i| (i["title"].as_str().unwrap().to_string(), i["done"].as_bool().unwrap()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("a".to_string(), true),
            ("b".to_string(), true),
            ("a".to_string(), false),
            ("c".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn update_is_a_patch_not_a_replace() {
    let bed = bed_with(vec![tasks_def()]);
    let created = bed
        .engine
        .create("tasks", obj(json!({"title": "keep", "done": false, "priority": 7})))
        .await
        .unwrap();
    let id = id_of(&created);

    bed.engine.update("tasks", &id, obj(json!({"done": true}))).await.unwrap();
    let fetched = bed.engine.get("tasks", &id, &ReadOptions::default()).await.unwrap().unwrap();
    assert_eq!(fetched["title"], json!("keep"));
    assert_eq!(fetched["priority"], json!(7));
    assert_eq!(fetched["done"], json!(true));
}

#[tokio::test]
async fn soft_delete_hides_the_record_but_keeps_row_and_index() {
    let bed = bed_with(vec![tasks_def()]);
    let created = bed.engine.create("tasks", obj(json!({"title": "gone soon"}))).await.unwrap();
    let id = id_of(&created);

    bed.engine.delete("tasks", &id, false).await.unwrap();
    assert!(bed.engine.get("tasks", &id, &ReadOptions::default()).await.unwrap().is_none());

    let raw = bed.store.get_raw("tasks", &id).await.unwrap().expect("row retained");
    assert!(raw.deleted);
    assert!(!bed.store.index_rows("tasks", &id).await.is_empty());

    // Deleted records do not surface through filters either.
    let result = bed.engine.list("tasks", &filter_query(&[("title", "eq:gone soon")])).await.unwrap();
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn hard_delete_removes_row_and_index() {
    let bed = bed_with(vec![tasks_def()]);
    let created = bed.engine.create("tasks", obj(json!({"title": "gone"}))).await.unwrap();
    let id = id_of(&created);

    bed.engine.delete("tasks", &id, true).await.unwrap();
    assert!(bed.store.get_raw("tasks", &id).await.unwrap().is_none());
    assert!(bed.store.index_rows("tasks", &id).await.is_empty());
}

#[tokio::test]
async fn index_rebuild_is_idempotent() {
    let bed = bed_with(vec![tasks_def()]);
    let created = bed.engine.create("tasks", obj(json!({"title": "same", "done": true}))).await.unwrap();
    let id = id_of(&created);

    let before = bed.store.index_rows("tasks", &id).await;
    assert!(!before.is_empty());

    let contract = bed.engine.provider().get_by_key("tasks").await.unwrap();
    let record = bed.store.get_raw("tasks", &id).await.unwrap().unwrap();
    bed.store.rebuild_index("tasks", &id, &contract, &record.document).await.unwrap();
    assert_eq!(bed.store.index_rows("tasks", &id).await, before);
}

#[tokio::test]
async fn default_order_is_most_recently_updated_first() {
    let bed = bed_with(vec![tasks_def()]);
    let first = bed.engine.create("tasks", obj(json!({"title": "first"}))).await.unwrap();
    settle().await;
    bed.engine.create("tasks", obj(json!({"title": "second"}))).await.unwrap();
    settle().await;
    bed.engine.update("tasks", &id_of(&first), obj(json!({"done": true}))).await.unwrap();

    let query = ListQuery { sort: Some("bogus".into()), ..Default::default() };
    let result = bed.engine.list("tasks", &query).await.unwrap();
    assert_eq!(result.items[0]["title"], json!("first"));
}

#[tokio::test]
async fn paging_clamps_and_counts_before_skip() {
    let bed = bed_with(vec![tasks_def()]);
    for i in 0..5 {
        bed.engine.create("tasks", obj(json!({"title": format!("t{}", i)}))).await.unwrap();
        settle().await;
    }
    let query = ListQuery { page: Some(2), page_size: Some(2), ..Default::default() };
    let result = bed.engine.list("tasks", &query).await.unwrap();
    assert_eq!((result.page, result.page_size, result.total), (2, 2, 5));
    assert_eq!(result.items.len(), 2);

    // page 0 clamps to 1; oversized page_size clamps to the contract maximum.
    let query = ListQuery { page: Some(0), page_size: Some(9999), ..Default::default() };
    let result = bed.engine.list("tasks", &query).await.unwrap();
    assert_eq!((result.page, result.page_size), (1, 25));
    assert_eq!(result.items.len(), 5);
}

#[tokio::test]
async fn global_hooks_run_in_declared_order_and_failures_abort() {
    let mut bed = bed_with(vec![tasks_def()]);
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    bed.engine.hooks_mut().register(
        HookStage::Before,
        Operation::Create,
        None,
        2,
        Arc::new(move |_ctx| {
            let l = l.clone();
            Box::pin(async move {
                l.lock().unwrap().push("second");
                Ok(())
            })
        }),
    );
    let l = log.clone();
    bed.engine.hooks_mut().register(
        HookStage::Before,
        Operation::Create,
        None,
        1,
        Arc::new(move |_ctx| {
            let l = l.clone();
            Box::pin(async move {
                l.lock().unwrap().push("first");
                Ok(())
            })
        }),
    );
    bed.engine.create("tasks", obj(json!({"title": "ok"}))).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);

    bed.engine.hooks_mut().register(
        HookStage::Before,
        Operation::Create,
        None,
        0,
        Arc::new(|_ctx| Box::pin(async { Err(EngineError::Unsupported("blocked".into())) })),
    );
    let err = bed.engine.create("tasks", obj(json!({"title": "never"}))).await.unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
    let result = bed.engine.list("tasks", &filter_query(&[("title", "eq:never")])).await.unwrap();
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn resource_scoped_before_hook_can_rewrite_the_payload() {
    let mut bed = bed_with(vec![tasks_def()]);
    bed.engine.hooks_mut().register(
        HookStage::Before,
        Operation::Create,
        Some("tasks"),
        1,
        Arc::new(|ctx| {
            if let Some(payload) = ctx.payload.as_mut() {
                payload.insert("priority".into(), json!(9));
            }
            Box::pin(async { Ok(()) })
        }),
    );
    let created = bed.engine.create("tasks", obj(json!({"title": "boosted"}))).await.unwrap();
    assert_eq!(created["priority"], json!(9));
}

#[tokio::test]
async fn overrides_replace_the_default_path_but_global_hooks_still_run() {
    let mut bed = bed_with(vec![tasks_def()]);
    let seen: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let s = seen.clone();
    bed.engine.hooks_mut().register(
        HookStage::After,
        Operation::Get,
        None,
        1,
        Arc::new(move |_ctx| {
            let s = s.clone();
            Box::pin(async move {
                *s.lock().unwrap() += 1;
                Ok(())
            })
        }),
    );
    bed.engine.overrides_mut().register(
        "tasks",
        Operation::Get,
        Arc::new(|_ctx| Box::pin(async { Ok(json!({"custom": true})) })),
    );

    let result = bed.engine.get("tasks", "any-id", &ReadOptions::default()).await.unwrap();
    assert_eq!(result, Some(json!({"custom": true})));
    assert_eq!(*seen.lock().unwrap(), 1);
    assert!(bed.store.get_raw("tasks", "any-id").await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_operations_fail_fast() {
    let mut def = tasks_def();
    def.operations = Some(vec![Operation::List, Operation::Get]);
    let bed = bed_with(vec![def]);
    let err = bed.engine.create("tasks", obj(json!({"title": "no"}))).await.unwrap_err();
    assert!(matches!(err, EngineError::OperationDisabled { operation: Operation::Create, .. }));
    assert!(bed.engine.list("tasks", &ListQuery::default()).await.is_ok());
}

#[tokio::test]
async fn contract_changes_apply_after_a_timestamp_bump() {
    let bed = bed_with(vec![tasks_def()]);
    for i in 0..3 {
        bed.engine.create("tasks", obj(json!({"title": format!("t{}", i)}))).await.unwrap();
    }
    let mut shrunk = tasks_def();
    shrunk.max_page_size = Some(2);

    // Same timestamp: the cached contract still serves.
    bed.definitions.replace(shrunk.clone(), false).await;
    let result = bed.engine.list("tasks", &ListQuery { page_size: Some(10), ..Default::default() }).await.unwrap();
    assert_eq!(result.page_size, 10);

    bed.definitions.replace(shrunk, true).await;
    let result = bed.engine.list("tasks", &ListQuery { page_size: Some(10), ..Default::default() }).await.unwrap();
    assert_eq!(result.page_size, 2);
}

#[tokio::test]
async fn non_generating_key_types_require_a_client_key() {
    let mut def = base_def("items", vec![field("id", FieldType::Int64), field("label", FieldType::String)]);
    def.key_field = KeyDefinition { name: "id".into(), type_: FieldType::Int64 };
    let bed = bed_with(vec![def]);

    let err = bed.engine.create("items", obj(json!({"label": "x"}))).await.unwrap_err();
    assert_eq!(
        err.validation().unwrap().messages("id"),
        ["Key is required; no auto-generation is configured for this key type."]
    );

    let created = bed.engine.create("items", obj(json!({"id": 7, "label": "x"}))).await.unwrap();
    assert_eq!(created["id"], json!(7));
    assert!(bed.engine.get("items", "7", &ReadOptions::default()).await.unwrap().is_some());
}

fn tasks_with_relations() -> Vec<ResourceDefinition> {
    let projects = base_def("projects", vec![field("name", FieldType::String)]);
    let tags = base_def("tags", vec![field("label", FieldType::String)]);
    let mut tasks = tasks_def();
    tasks.relations = vec![
        RelationDefinition {
            name: "project".into(),
            api_name: None,
            kind: RelationKind::ToOne,
            target: "projects".into(),
            expandable: true,
            default_expanded: false,
            write: RelationWriteMode::ById,
            write_field: None,
            required_on_create: false,
            foreign_key: None,
        },
        RelationDefinition {
            name: "tags".into(),
            api_name: None,
            kind: RelationKind::ToMany,
            target: "tags".into(),
            expandable: true,
            default_expanded: false,
            write: RelationWriteMode::ByIdList,
            write_field: Some("tag_ids".into()),
            required_on_create: false,
            foreign_key: None,
        },
    ];
    vec![projects, tags, tasks]
}

#[tokio::test]
async fn relations_expand_to_one_and_to_many() {
    let bed = bed_with(tasks_with_relations());
    let project = bed.engine.create("projects", obj(json!({"name": "Apollo"}))).await.unwrap();
    let tag_a = bed.engine.create("tags", obj(json!({"label": "urgent"}))).await.unwrap();
    let tag_b = bed.engine.create("tags", obj(json!({"label": "home"}))).await.unwrap();

    let created = bed
        .engine
        .create(
            "tasks",
            obj(json!({
                "title": "wired",
                "project_id": id_of(&project),
                "tag_ids": [id_of(&tag_a), id_of(&tag_b)],
            })),
        )
        .await
        .unwrap();
    let id = id_of(&created);

    let options = ReadOptions { expand: Some(vec!["project".into(), "tags".into()]), fields: None };
    let fetched = bed.engine.get("tasks", &id, &options).await.unwrap().unwrap();
    assert_eq!(fetched["project"]["name"], json!("Apollo"));
    let labels: Vec<&str> = fetched["tags"].as_array().unwrap().iter().map(|t| t["label"].as_str().unwrap()).collect();
    assert_eq!(labels, vec!["urgent", "home"]);

    // Unknown expand names are dropped, not errors.
    let options = ReadOptions { expand: Some(vec!["bogus".into()]), fields: None };
    assert!(bed.engine.get("tasks", &id, &options).await.unwrap().is_some());
}

#[tokio::test]
async fn relation_writes_validate_target_existence() {
    let bed = bed_with(tasks_with_relations());
    let err = bed
        .engine
        .create("tasks", obj(json!({"title": "dangling", "project_id": uuid::Uuid::new_v4().to_string()})))
        .await
        .unwrap_err();
    assert_eq!(err.validation().unwrap().messages("project_id"), ["Referenced record not found."]);
}

#[tokio::test]
async fn cross_backend_relations_are_rejected_loudly() {
    let mut legacy = base_def("legacy", vec![field("name", FieldType::String)]);
    legacy.backend = BackendKind::Relational;
    let mut tasks = tasks_def();
    tasks.relations = vec![RelationDefinition {
        name: "external".into(),
        api_name: None,
        kind: RelationKind::ToOne,
        target: "legacy".into(),
        expandable: true,
        default_expanded: false,
        write: RelationWriteMode::ById,
        write_field: Some("legacy_id".into()),
        required_on_create: false,
        foreign_key: None,
    }];
    let bed = bed_with(vec![legacy, tasks]);

    let err = bed
        .engine
        .create("tasks", obj(json!({"title": "x", "legacy_id": "l1"})))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));

    let created = bed.engine.create("tasks", obj(json!({"title": "x"}))).await.unwrap();
    let options = ReadOptions { expand: Some(vec!["external".into()]), fields: None };
    let err = bed.engine.get("tasks", &id_of(&created), &options).await.unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
}

#[tokio::test]
async fn search_is_or_combined_and_ignored_without_searchable_fields() {
    let mut def = tasks_def();
    let mut note = field("note", FieldType::String);
    note.searchable = true;
    def.fields.push(note);
    let bed = bed_with(vec![def]);
    bed.engine.create("tasks", obj(json!({"title": "buy milk"}))).await.unwrap();
    bed.engine.create("tasks", obj(json!({"title": "other", "note": "milk too"}))).await.unwrap();
    bed.engine.create("tasks", obj(json!({"title": "unrelated"}))).await.unwrap();

    let query = ListQuery { search: Some("MILK".into()), ..Default::default() };
    let result = bed.engine.list("tasks", &query).await.unwrap();
    assert_eq!(result.total, 2);

    let plain = base_def("plain", vec![field("label", FieldType::String)]);
    let bed = bed_with(vec![plain]);
    bed.engine.create("plain", obj(json!({"label": "milk"}))).await.unwrap();
    let query = ListQuery { search: Some("nope".into()), ..Default::default() };
    assert_eq!(bed.engine.list("plain", &query).await.unwrap().total, 1);
}

#[tokio::test]
async fn isnull_filter_matches_missing_values() {
    let bed = bed_with(vec![tasks_def()]);
    bed.engine.create("tasks", obj(json!({"title": "with", "done": true}))).await.unwrap();
    bed.engine.create("tasks", obj(json!({"title": "without"}))).await.unwrap();

    let result = bed.engine.list("tasks", &filter_query(&[("done", "isnull:true")])).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.items[0]["title"], json!("without"));

    let result = bed.engine.list("tasks", &filter_query(&[("done", "isnull:false")])).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.items[0]["title"], json!("with"));
}

#[tokio::test]
async fn defaults_are_stamped_when_the_payload_omits_the_field() {
    let mut def = tasks_def();
    let mut status = field("status", FieldType::String);
    status.default = Some(json!("open"));
    def.fields.push(status);
    let bed = bed_with(vec![def]);

    let created = bed.engine.create("tasks", obj(json!({"title": "defaulted"}))).await.unwrap();
    assert_eq!(created["status"], json!("open"));

    let explicit = bed
        .engine
        .create("tasks", obj(json!({"title": "explicit", "status": "closed"})))
        .await
        .unwrap();
    assert_eq!(explicit["status"], json!("closed"));
}

#[tokio::test]
async fn relational_resources_do_not_execute_here() {
    let mut def = tasks_def();
    def.backend = BackendKind::Relational;
    let bed = bed_with(vec![def]);
    let err = bed.engine.list("tasks", &ListQuery::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
}

#[tokio::test]
async fn field_selection_narrows_list_items() {
    let bed = bed_with(vec![tasks_def()]);
    bed.engine.create("tasks", obj(json!({"title": "narrow", "done": true}))).await.unwrap();
    let query = ListQuery { fields: Some(vec!["title".into()]), ..Default::default() };
    let result = bed.engine.list("tasks", &query).await.unwrap();
    let item = result.items[0].as_object().unwrap();
    assert!(item.contains_key("title") && item.contains_key("id"));
    assert!(!item.contains_key("done"));
}

#[tokio::test]
async fn unknown_resource_is_not_found() {
    let bed = bed_with(vec![tasks_def()]);
    let err = bed.engine.list("nope", &ListQuery::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn update_and_delete_of_missing_records_fail_hard() {
    let bed = bed_with(vec![tasks_def()]);
    let err = bed.engine.update("tasks", "missing", obj(json!({"title": "x"}))).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    let err = bed.engine.delete("tasks", "missing", false).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

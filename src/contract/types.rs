//! Raw resource definition types as supplied by a definition store.

use crate::contract::model::{BackendKind, FieldType, Operation, RelationKind, RelationWriteMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_true() -> bool {
    true
}

/// Per-field constraint rules, checked on create/update payloads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Required on create.
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    /// Defaults to `name`.
    #[serde(default)]
    pub api_name: Option<String>,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default = "default_true")]
    pub in_read: bool,
    #[serde(default = "default_true")]
    pub in_create: bool,
    #[serde(default = "default_true")]
    pub in_update: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub immutable: bool,
    /// Expression marking the field computed (read-only).
    #[serde(default)]
    pub computed: Option<String>,
    /// Marks this field as the optimistic-concurrency token.
    #[serde(default)]
    pub concurrency_token: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub validation: ValidationRule,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    #[serde(default)]
    pub api_name: Option<String>,
    pub kind: RelationKind,
    /// Resource key of the related resource.
    pub target: String,
    #[serde(default = "default_true")]
    pub expandable: bool,
    #[serde(default)]
    pub default_expanded: bool,
    #[serde(default)]
    pub write: RelationWriteMode,
    /// Document property holding the referenced id(s). Defaults to the
    /// foreign-key name, else `{api_name}_id` / `{api_name}_ids` by kind.
    #[serde(default)]
    pub write_field: Option<String>,
    #[serde(default)]
    pub required_on_create: bool,
    #[serde(default)]
    pub foreign_key: Option<String>,
}

/// One resource as described by the definition store. Input to the contract builder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Stable resource key.
    pub key: String,
    pub route: String,
    #[serde(default)]
    pub backend: BackendKind,
    pub key_field: KeyDefinition,
    #[serde(default)]
    pub max_page_size: Option<u32>,
    #[serde(default)]
    pub max_expand_depth: Option<u32>,
    #[serde(default)]
    pub default_sort: Option<String>,
    /// Enabled operations; `None` enables all five.
    #[serde(default)]
    pub operations: Option<Vec<Operation>>,
    /// Whether an update must carry the concurrency token (when one is declared).
    #[serde(default = "default_true")]
    pub require_concurrency_token: bool,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    /// Operation → security policy name; missing entries default to `{route}.{verb}`.
    #[serde(default)]
    pub policies: HashMap<Operation, String>,
}

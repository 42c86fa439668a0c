//! Normalized resource contract: raw definitions validated and flattened for runtime use.

use crate::contract::types::ValidationRule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Storage family a resource uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Schema-less document store with synthetic secondary indexing.
    #[default]
    Dynamic,
    /// Native typed table; only query compilation is handled here.
    Relational,
}

/// Scalar (or typed-array) type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int32,
    Int64,
    Decimal,
    Boolean,
    Guid,
    DateTime,
    String,
    Enum,
    Json,
    Int32Array,
    Int64Array,
    StringArray,
    GuidArray,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64 | FieldType::Decimal)
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            FieldType::Int32Array | FieldType::Int64Array | FieldType::StringArray | FieldType::GuidArray
        )
    }

    /// Whether the engine can mint a key of this type when the client omits it.
    pub fn supports_generation(self) -> bool {
        matches!(self, FieldType::Guid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn verb(self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// How a relation is written on create/update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationWriteMode {
    #[default]
    Disabled,
    ById,
    ByIdList,
}

#[derive(Clone, Debug)]
pub struct FieldContract {
    /// Canonical (storage) name; the relational backend's column name.
    pub name: String,
    /// Name used in payloads, filters, and projections.
    pub api_name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub in_read: bool,
    pub in_create: bool,
    pub in_update: bool,
    pub filterable: bool,
    pub sortable: bool,
    pub searchable: bool,
    /// Hard deny: never read or written, regardless of other flags.
    pub hidden: bool,
    pub immutable: bool,
    /// Expression for a computed, read-only field.
    pub computed: Option<String>,
    pub is_key: bool,
    pub is_concurrency_token: bool,
    pub default: Option<Value>,
    pub rules: ValidationRule,
}

#[derive(Clone, Debug)]
pub struct RelationContract {
    pub name: String,
    pub api_name: String,
    pub kind: RelationKind,
    /// Resource key of the related resource.
    pub target: String,
    pub expandable: bool,
    pub default_expanded: bool,
    pub write: RelationWriteMode,
    /// Document property holding the referenced id(s).
    pub write_field: String,
    pub required_on_create: bool,
}

#[derive(Clone, Debug)]
pub struct QueryContract {
    pub max_page_size: u32,
    pub filterable: BTreeSet<String>,
    pub sortable: BTreeSet<String>,
    pub searchable: BTreeSet<String>,
    pub default_sort: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReadContract {
    pub expandable: BTreeSet<String>,
    pub max_expand_depth: u32,
    pub default_expanded: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Optimistic,
}

#[derive(Clone, Debug)]
pub struct ConcurrencyContract {
    pub mode: ConcurrencyMode,
    /// API name of the field carrying the version token.
    pub token_field: String,
    pub required_on_update: bool,
}

#[derive(Clone, Debug)]
pub struct OperationContract {
    pub enabled: bool,
    /// API names accepted in the payload.
    pub input: BTreeSet<String>,
    /// API names present in the response shape.
    pub output: BTreeSet<String>,
    pub required_on_create: BTreeSet<String>,
    pub immutable: BTreeSet<String>,
    pub concurrency: Option<ConcurrencyContract>,
}

/// Normalized, immutable description of one resource. Built once, cached by the provider.
#[derive(Clone, Debug)]
pub struct ResourceContract {
    pub key: String,
    pub route: String,
    pub backend: BackendKind,
    /// API name of the key field; always present among `fields` and immutable.
    pub key_field: String,
    pub key_type: FieldType,
    pub query: QueryContract,
    pub read: ReadContract,
    pub fields: Vec<FieldContract>,
    pub relations: Vec<RelationContract>,
    pub operations: HashMap<Operation, OperationContract>,
    /// Operation → security policy name; enforcement belongs to an outer layer.
    pub policies: HashMap<Operation, String>,
}

impl ResourceContract {
    /// Field lookup by API name, case-insensitive.
    pub fn field(&self, api_name: &str) -> Option<&FieldContract> {
        self.fields.iter().find(|f| f.api_name.eq_ignore_ascii_case(api_name))
    }

    /// Relation lookup by API name, case-insensitive.
    pub fn relation(&self, api_name: &str) -> Option<&RelationContract> {
        self.relations.iter().find(|r| r.api_name.eq_ignore_ascii_case(api_name))
    }

    pub fn operation(&self, op: Operation) -> Option<&OperationContract> {
        self.operations.get(&op)
    }

    pub fn key_field_contract(&self) -> &FieldContract {
        self.fields
            .iter()
            .find(|f| f.is_key)
            .expect("contract always carries its key field")
    }

    /// The update operation's concurrency contract, when one is declared.
    pub fn concurrency(&self) -> Option<&ConcurrencyContract> {
        self.operations.get(&Operation::Update).and_then(|o| o.concurrency.as_ref())
    }
}

//! Blueprint engine: contract-driven CRUD over a dynamic document store.
//!
//! Resources are described once as a raw definition, normalized into a cached
//! contract, and served by a generic engine: list/get/create/update/delete
//! against a schema-less document store whose filtering and sorting run over a
//! synthetic secondary index.

pub mod contract;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod store;

pub use contract::{build, ContractProvider, Operation, RawDefinitionStore, ResourceContract, ResourceDefinition};
pub use engine::{HookDispatcher, HookScope, HookStage, ListResult, OverrideRegistry, ReadOptions, ResourceEngine};
pub use error::{EngineError, ValidationErrors};
pub use index::{IndexPredicate, IndexRow, IndexValue};
pub use query::ListQuery;
pub use store::{engine_schema, ensure_engine_tables, DocumentStore, IndexService, MemoryStore, PgStore, StoredRecord};

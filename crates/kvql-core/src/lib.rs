//! kvql core - relational queries over key-value structures.
//!
//! This crate executes resolved select/insert/replace/update/delete queries
//! against a key-value store whose entities live in lists, sets, hashes or
//! sorted sets. It provides the entity catalog, the structure-store boundary
//! with an embedded sled implementation, and the query engine.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod error;
pub mod query;
pub mod storage;
pub mod structure;

pub use catalog::{Catalog, EntityDef};
pub use error::{Error, ErrorKind, ErrorReport};
pub use query::{
    ExecutionContext, ExecutorConfig, FilterGroups, FilterPlanner, KvStorage, QueryExecutor,
    RawRecords, ResultAssembler, ScanCursor, ScanEngine, ScanPages,
};
pub use storage::{
    PoolConfig, ScanPage, SledStore, StoreConfig, StoreError, StorePool, StructureStore, WriteMode,
};
pub use structure::{StructureType, StructureTypeResolver};

/// Re-export protocol types.
pub use kvql_proto as proto;

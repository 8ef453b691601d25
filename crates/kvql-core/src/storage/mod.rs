//! Storage layer for kvql.
//!
//! Defines the structure-store command surface, a sled-backed implementation
//! and a pool that hands handles to concurrent operations.

mod config;
mod engine;
mod error;
mod pool;
mod store;

pub mod pattern;

pub use config::{PoolConfig, StoreConfig, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_HANDLES};
pub use engine::SledStore;
pub use error::StoreError;
pub use pool::{HandleFactory, PoolStats, PooledHandle, StorePool};
pub use store::{ScanPage, StructureStore, WriteMode, CURSOR_START};

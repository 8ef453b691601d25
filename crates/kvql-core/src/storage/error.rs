//! Store (transport) error types.

use std::time::Duration;

use thiserror::Error;

/// Failures raised at the store boundary.
///
/// Every variant is a round-trip failure from the engine's point of view: the
/// enclosing scan, fetch or write is aborted and nothing is retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying sled error.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] kvql_proto::Error),

    /// Catalog entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Key contains bytes the store cannot address.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Stored bytes do not describe a valid entry.
    #[error("corrupt entry under {0:?}")]
    Corrupt(String),

    /// A scan cursor the store never issued, or one already consumed.
    #[error("unknown scan cursor {0}")]
    UnknownCursor(u64),

    /// No handle became available before the acquire timeout.
    #[error("timed out after {0:?} waiting for a store handle")]
    AcquireTimeout(Duration),

    /// The handle factory could not open a new handle.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

//! kvql protocol types.
//!
//! This crate defines the resolved query IR handed to the engine, the runtime
//! value type and the result blocks the engine produces.
//!
//! # Modules
//!
//! - [`value`] - Runtime value type stored in structures and used in queries
//! - [`query`] - Resolved query IR (action, subjects, predicates, columns)
//! - [`result`] - Record blocks and query results
//! - [`error`] - Protocol error types
//!
//! # Serialization
//!
//! All types derive `rkyv::Archive` as well as serde's traits. Queries are
//! usually exchanged as JSON:
//!
//! ```ignore
//! use kvql_proto::{Predicate, Query};
//!
//! let query = Query::select("users").with_predicate(Predicate::eq("users", "name", "a"));
//! let json = query.to_json()?;
//! assert_eq!(Query::from_json(&json)?, query);
//! ```

pub mod error;
pub mod query;
pub mod result;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use query::{Action, Assignment, Limit, Predicate, PredicateOp, Query, Subject, TupleColumn};
pub use result::{ColumnData, QueryResult, RecordBlock};
pub use value::Value;

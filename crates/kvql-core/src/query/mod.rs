//! Query engine for kvql.
//!
//! Translates resolved relational queries into structure commands: the
//! planner groups conditions per subject, the selector and scan engine read
//! records, the mutation writer applies writes and the assembler packages
//! the output.

mod assembler;
mod config;
mod executor;
mod fetch;
mod mutation;
mod planner;
mod scan;

pub use assembler::{ResultAssembler, KEY_COLUMN, SCORE_COLUMN, VALUE_COLUMN};
pub use config::{ExecutorConfig, DEFAULT_PAGE_SIZE};
pub use executor::{ExecutionContext, KvStorage, QueryExecutor, DEFAULT_STORAGE_NAME};
pub use fetch::RecordSelector;
pub use mutation::MutationWriter;
pub use planner::{FilterGroups, FilterPlanner, SubjectPlan};
pub use scan::{RawRecords, ScanCursor, ScanEngine, ScanPages};

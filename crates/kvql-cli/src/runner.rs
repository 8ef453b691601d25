//! Query execution for the command line.

use crate::formatter::Formatter;
use kvql_core::{ExecutionContext, KvStorage, SledStore, StoreError};
use kvql_proto::{Action, Query};
use thiserror::Error;
use tracing::{debug, warn};

/// Execution errors.
#[derive(Debug, Error)]
pub enum RunError {
    /// Input is not a valid query document.
    #[error("invalid query: {0}")]
    Parse(#[from] kvql_proto::Error),

    /// The storage rejected or failed the query.
    #[error("{0}")]
    Query(#[from] kvql_core::Error),

    /// Store failure outside query execution.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Executes JSON queries against an opened storage and formats the output.
pub struct Runner {
    storage: KvStorage<SledStore>,
    formatter: Box<dyn Formatter>,
}

impl Runner {
    /// Create a runner.
    pub fn new(storage: KvStorage<SledStore>, formatter: Box<dyn Formatter>) -> Self {
        Self { storage, formatter }
    }

    /// Get the storage.
    pub fn storage(&self) -> &KvStorage<SledStore> {
        &self.storage
    }

    /// Execute one query document and return formatted output.
    pub fn execute(&self, input: &str) -> Result<String, RunError> {
        let query = Query::from_json(input)?;
        let result = self.storage.execute(&query, &ExecutionContext::new())?;

        match query.resolved_action() {
            Some(Action::Select) | None => Ok(self.formatter.format_query_result(&result)),
            Some(_) => Ok(self.formatter.format_mutation_result(&result)),
        }
    }

    /// Execute a script with one query document per line.
    ///
    /// Blank lines and lines starting with `#` or `//` are skipped. A failed
    /// query is reported and the script continues. Returns the number of
    /// failed queries.
    pub fn run_script(&self, content: &str, out: &mut dyn FnMut(String)) -> usize {
        let statements = content
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with("//") && !l.starts_with('#'));

        let mut failures = 0;
        for (line, statement) in statements.enumerate() {
            match self.execute(statement) {
                Ok(output) => {
                    if !output.is_empty() {
                        out(output);
                    }
                }
                Err(e) => {
                    warn!(statement = line + 1, error = %e, "Statement failed");
                    out(self.format_error(&e));
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Register entities from a JSON array of definitions.
    pub fn register(&self, json: &str) -> Result<String, RunError> {
        let count = self.storage.catalog().load_json(json)?;
        self.storage.catalog().flush()?;
        debug!(count, "Registered entities");
        Ok(self
            .formatter
            .format_message(&format!("{} entity definition(s) registered", count)))
    }

    /// List registered entities.
    pub fn entities(&self) -> String {
        let catalog = self.storage.catalog();
        let entities: Vec<_> = catalog
            .list_entities()
            .iter()
            .filter_map(|name| catalog.get_entity(name))
            .collect();
        self.formatter.format_entities(&entities)
    }

    /// Format an execution error.
    pub fn format_error(&self, error: &RunError) -> String {
        match error {
            RunError::Query(e) => self.formatter.format_error(&e.report()),
            other => self.formatter.format_message(&format!("Error: {}", other)),
        }
    }

    /// Flush the store and catalog to disk.
    pub fn flush(&self) -> Result<(), RunError> {
        self.storage.pool().acquire()?.flush()?;
        self.storage.catalog().flush()?;
        Ok(())
    }
}

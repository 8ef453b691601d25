//! The storage facade: routes resolved queries to the read and write paths.

use std::sync::Arc;

use kvql_proto::{Action, Query, QueryResult, RecordBlock};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::assembler::ResultAssembler;
use super::config::ExecutorConfig;
use super::fetch::RecordSelector;
use super::mutation::MutationWriter;
use super::planner::{query_label, FilterGroups, FilterPlanner, SubjectPlan};
use crate::catalog::{Catalog, EntityDef};
use crate::error::{Error, ErrorReport};
use crate::storage::{PoolConfig, SledStore, StoreConfig, StoreError, StorePool, StructureStore};
use crate::structure::StructureTypeResolver;

/// Default storage name.
pub const DEFAULT_STORAGE_NAME: &str = "kv";

/// Per-call execution context.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Entity used for the primary subject instead of the catalog entry.
    pub main_entity: Option<EntityDef>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the main entity.
    pub fn with_main_entity(mut self, entity: EntityDef) -> Self {
        self.main_entity = Some(entity);
        self
    }
}

/// A key-value storage instance that executes resolved queries.
pub struct KvStorage<S: StructureStore> {
    name: String,
    pool: StorePool<S>,
    catalog: Arc<Catalog>,
    config: ExecutorConfig,
    resolver: StructureTypeResolver,
    last_error: Mutex<Option<ErrorReport>>,
}

impl<S: StructureStore> KvStorage<S> {
    /// Create a storage over a handle pool and catalog.
    pub fn new(pool: StorePool<S>, catalog: Arc<Catalog>, config: ExecutorConfig) -> Self {
        let resolver = StructureTypeResolver::new(config.strict_structure_types);
        Self {
            name: DEFAULT_STORAGE_NAME.to_string(),
            pool,
            catalog,
            config,
            resolver,
            last_error: Mutex::new(None),
        }
    }

    /// Name this storage.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the storage name.
    pub fn storage_name(&self) -> &str {
        &self.name
    }

    /// Rename this storage.
    pub fn set_storage_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Get the executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Get the handle pool.
    pub fn pool(&self) -> &StorePool<S> {
        &self.pool
    }

    /// Check that a store handle can be obtained.
    pub fn connect(&self) -> Result<(), Error> {
        let handle = self.pool.acquire().map_err(|e| self.remember(self.backend(e)))?;
        drop(handle);
        info!(storage = %self.name, "Connected");
        Ok(())
    }

    /// Drop idle store handles. Returns how many were dropped.
    pub fn disconnect(&self) -> usize {
        let dropped = self.pool.clear_idle();
        info!(storage = %self.name, dropped, "Disconnected");
        dropped
    }

    /// Report of the most recent failed execution, if the last one failed.
    pub fn last_error(&self) -> Option<ErrorReport> {
        self.last_error.lock().clone()
    }

    /// Execute a resolved query.
    pub fn execute(&self, query: &Query, context: &ExecutionContext) -> Result<QueryResult, Error> {
        match self.dispatch(query, context) {
            Ok(result) => {
                *self.last_error.lock() = None;
                Ok(result)
            }
            Err(e) => Err(self.remember(e)),
        }
    }

    /// Bind `query` to this storage, running it with `entity` as main entity.
    pub fn resolve_query_executor(&self, query: &Query, entity: Option<&EntityDef>) -> QueryExecutor<'_, S> {
        let context = ExecutionContext {
            main_entity: entity.cloned(),
        };
        QueryExecutor {
            storage: self,
            query: query.clone(),
            context,
        }
    }

    fn dispatch(&self, query: &Query, context: &ExecutionContext) -> Result<QueryResult, Error> {
        let action = query.resolved_action().ok_or_else(|| Error::UnknownAction {
            action: query.action.clone(),
            storage: self.name.clone(),
            query: query_label(query),
        })?;

        debug!(
            storage = %self.name,
            action = %action,
            subjects = query.subjects.len(),
            predicates = query.predicates.len(),
            "Executing query"
        );
        if let Some(limit) = query.limit.as_ref().filter(|l| l.is_not_empty()) {
            debug!(count = limit.count, offset = limit.offset, "Limit is not applied by key-value storage");
        }

        let planner = FilterPlanner::new(&self.catalog, &self.resolver, &self.name);
        let groups = planner.plan(query, context.main_entity.as_ref())?;

        match action {
            Action::Select => self.select(groups, query),
            _ => self.write(action, groups, query),
        }
    }

    fn select(&self, groups: FilterGroups<'_>, query: &Query) -> Result<QueryResult, Error> {
        let subjects = groups.into_subjects();

        let blocks = if self.config.parallel_subjects && subjects.len() > 1 {
            std::thread::scope(|scope| {
                let workers: Vec<_> = subjects
                    .iter()
                    .map(|plan| scope.spawn(move || self.read_subject(plan, query)))
                    .collect();
                workers
                    .into_iter()
                    .map(|worker| worker.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect::<Result<Vec<_>, Error>>()
            })?
        } else {
            subjects
                .iter()
                .map(|plan| self.read_subject(plan, query))
                .collect::<Result<Vec<_>, Error>>()?
        };

        Ok(QueryResult::new(blocks))
    }

    /// Read one subject on its own store handle.
    fn read_subject(&self, plan: &SubjectPlan<'_>, query: &Query) -> Result<RecordBlock, Error> {
        let handle = self.pool.acquire().map_err(|e| self.backend(e))?;
        let records = RecordSelector::new(&*handle, self.config.page_size)
            .select(plan)
            .map_err(|e| self.backend(e))?;
        drop(handle);

        let block = ResultAssembler::assemble(plan.alias, &plan.entity, records);
        ResultAssembler::project(block, &plan.columns).map_err(|column| Error::MalformedQuery {
            reason: format!("unknown column {}", column),
            storage: self.name.clone(),
            query: query_label(query),
        })
    }

    fn write(&self, action: Action, groups: FilterGroups<'_>, query: &Query) -> Result<QueryResult, Error> {
        if groups.len() != 1 {
            return Err(Error::MalformedQuery {
                reason: format!("{} takes exactly one subject, got {}", action, groups.len()),
                storage: self.name.clone(),
                query: query_label(query),
            });
        }
        let plan = groups.primary();

        let handle = self.pool.acquire().map_err(|e| self.backend(e))?;
        let written = MutationWriter::new(&*handle, self.config.page_size, &self.name).apply(action, plan, query)?;
        drop(handle);

        let block = ResultAssembler::affected(plan.alias, &plan.entity, written);
        Ok(QueryResult::affected(block))
    }

    fn backend(&self, source: StoreError) -> Error {
        Error::backend(self.name.clone(), source)
    }

    fn remember(&self, e: Error) -> Error {
        error!(storage = %self.name, kind = ?e.kind(), error = %e, "Query failed");
        *self.last_error.lock() = Some(e.report());
        e
    }
}

impl KvStorage<SledStore> {
    /// Open an embedded sled store with its catalog.
    pub fn open(
        store_config: StoreConfig,
        pool_config: PoolConfig,
        config: ExecutorConfig,
    ) -> Result<Self, StoreError> {
        let store = SledStore::open(store_config)?;
        if store.was_recovered() {
            info!("Recovered existing store");
        }
        let catalog = Arc::new(Catalog::open(store.db())?);
        let pool = StorePool::for_sled(store, pool_config);
        Ok(Self::new(pool, catalog, config))
    }
}

/// A query bound to a storage and an execution context.
pub struct QueryExecutor<'s, S: StructureStore> {
    storage: &'s KvStorage<S>,
    query: Query,
    context: ExecutionContext,
}

impl<S: StructureStore> QueryExecutor<'_, S> {
    /// Run the bound query.
    pub fn execute(&self) -> Result<QueryResult, Error> {
        self.storage.execute(&self.query, &self.context)
    }

    /// Get the bound query.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Get the execution context.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

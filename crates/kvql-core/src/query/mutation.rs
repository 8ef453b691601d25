//! Write paths: insert, replace, update and delete.

use kvql_proto::{Action, Assignment, Query, Value};
use tracing::info;

use super::fetch::RecordSelector;
use super::planner::{query_label, SubjectPlan};
use crate::error::Error;
use crate::storage::{StructureStore, WriteMode};
use crate::structure::StructureType;

/// A validated write payload, one variant per structure.
#[derive(Clone, Copy)]
enum Payload<'q> {
    Scalar(&'q Value),
    Member,
    Field(&'q Value),
    Score(f64),
}

/// Applies write actions to one subject.
pub struct MutationWriter<'a, S: StructureStore + ?Sized> {
    store: &'a S,
    page_size: usize,
    storage: &'a str,
}

impl<'a, S: StructureStore + ?Sized> MutationWriter<'a, S> {
    /// Create a writer.
    pub fn new(store: &'a S, page_size: usize, storage: &'a str) -> Self {
        Self {
            store,
            page_size,
            storage,
        }
    }

    /// Apply `action` to the subject of `plan`.
    ///
    /// Returns the full names of the records actually written or removed.
    pub fn apply(
        &self,
        action: Action,
        plan: &SubjectPlan<'_>,
        query: &Query,
    ) -> Result<Vec<String>, Error> {
        let written = match action {
            Action::Insert => self.put(plan, query, WriteMode::IfAbsent)?,
            Action::Replace => self.put(plan, query, WriteMode::Always)?,
            Action::Update => self.update(plan, query)?,
            Action::Delete => self.delete(plan)?,
            Action::Select => {
                return Err(self.malformed(query, "SELECT is not a write action".to_string()))
            }
        };

        info!(
            storage = self.storage,
            action = %action,
            entity = %plan.entity.name,
            structure_type = %plan.structure,
            affected = written.len(),
            "Write applied"
        );
        Ok(written)
    }

    /// Insert or replace one record per assignment.
    fn put(&self, plan: &SubjectPlan<'_>, query: &Query, mode: WriteMode) -> Result<Vec<String>, Error> {
        if query.assignments.is_empty() {
            return Err(self.malformed(query, "write has no assignments".to_string()));
        }

        // Validate every payload before the first write
        let payloads = query
            .assignments
            .iter()
            .map(|assignment| {
                let payload = self.payload(plan.structure, assignment, query)?;
                Ok((plan.entity.record_name(&assignment.column), payload))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let container = plan.entity.container_key();
        let mut written = Vec::new();
        for (name, payload) in payloads {
            if self.write_one(container, &name, payload, mode)? {
                written.push(name);
            }
        }
        Ok(written)
    }

    /// Overwrite the payload of selected records that still exist.
    fn update(&self, plan: &SubjectPlan<'_>, query: &Query) -> Result<Vec<String>, Error> {
        let column = match plan.structure.payload_column() {
            Some(column) => column,
            None => {
                return Err(Error::UnsupportedAction {
                    action: Action::Update.to_string(),
                    structure_type: plan.structure.to_string(),
                    storage: self.storage.to_string(),
                    query: query_label(query),
                })
            }
        };

        let assignment = match query.assignments.as_slice() {
            [assignment] if assignment.column == column => assignment,
            _ => {
                return Err(self.malformed(
                    query,
                    format!("UPDATE of {} takes exactly one assignment to {}", plan.structure, column),
                ))
            }
        };
        let payload = self.payload(plan.structure, assignment, query)?;

        let records = RecordSelector::new(self.store, self.page_size)
            .select(plan)
            .map_err(|e| Error::backend(self.storage, e))?;

        let container = plan.entity.container_key();
        let mut written = Vec::new();
        for name in records.names() {
            if self.write_one(container, name, payload, WriteMode::IfPresent)? {
                written.push(name.to_string());
            }
        }
        Ok(written)
    }

    /// Remove selected records.
    fn delete(&self, plan: &SubjectPlan<'_>) -> Result<Vec<String>, Error> {
        let records = RecordSelector::new(self.store, self.page_size)
            .select(plan)
            .map_err(|e| Error::backend(self.storage, e))?;

        let container = plan.entity.container_key();
        let mut removed = Vec::new();
        for name in records.names() {
            let existed = match plan.structure {
                StructureType::List => self.store.del(name),
                StructureType::Set => self.store.srem(container, name),
                StructureType::Hash => self.store.hdel(container, name),
                StructureType::SortedSet => self.store.zrem(container, name),
            }
            .map_err(|e| Error::backend(self.storage, e))?;

            if existed {
                removed.push(name.to_string());
            }
        }
        Ok(removed)
    }

    fn payload<'q>(
        &self,
        structure: StructureType,
        assignment: &'q Assignment,
        query: &Query,
    ) -> Result<Payload<'q>, Error> {
        match structure {
            StructureType::List => Ok(Payload::Scalar(&assignment.value)),
            StructureType::Set => Ok(Payload::Member),
            StructureType::Hash => Ok(Payload::Field(&assignment.value)),
            StructureType::SortedSet => assignment.value.as_f64().map(Payload::Score).ok_or_else(|| {
                self.malformed(
                    query,
                    format!("score for {} must be numeric, got {}", assignment.column, assignment.value),
                )
            }),
        }
    }

    fn write_one(
        &self,
        container: &str,
        name: &str,
        payload: Payload<'_>,
        mode: WriteMode,
    ) -> Result<bool, Error> {
        let written = match payload {
            Payload::Scalar(value) => self.store.set(name, value, mode),
            // Members carry no payload, so replacing an existing one still counts
            Payload::Member => self
                .store
                .sadd(container, name)
                .map(|added| added || mode == WriteMode::Always),
            Payload::Field(value) => self.store.hset(container, name, value, mode),
            Payload::Score(score) => self.store.zadd(container, name, score, mode),
        }
        .map_err(|e| Error::backend(self.storage, e))?;
        Ok(written)
    }

    fn malformed(&self, query: &Query, reason: String) -> Error {
        Error::MalformedQuery {
            reason,
            storage: self.storage.to_string(),
            query: query_label(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityDef};
    use crate::query::FilterPlanner;
    use crate::storage::{SledStore, StoreConfig};
    use crate::structure::StructureTypeResolver;
    use kvql_proto::Predicate;

    fn setup() -> (SledStore, Catalog) {
        let store = SledStore::open(StoreConfig::temporary()).unwrap();
        let catalog = Catalog::open(store.db()).unwrap();
        catalog
            .register(EntityDef::new("tags").with_structure(StructureType::List))
            .unwrap();
        catalog
            .register(EntityDef::new("board").with_structure(StructureType::SortedSet))
            .unwrap();
        catalog.register(EntityDef::new("users")).unwrap();
        store.set("tags:red", &Value::Int64(1), WriteMode::Always).unwrap();
        store.set("tags:blue", &Value::Int64(2), WriteMode::Always).unwrap();
        (store, catalog)
    }

    fn apply(store: &SledStore, catalog: &Catalog, query: &Query) -> Result<Vec<String>, Error> {
        let resolver = StructureTypeResolver::default();
        let groups = FilterPlanner::new(catalog, &resolver, "kv").plan(query, None)?;
        let action = query.resolved_action().unwrap();
        MutationWriter::new(store, 10, "kv").apply(action, groups.primary(), query)
    }

    #[test]
    fn test_insert_keeps_existing_records() {
        let (store, catalog) = setup();

        let query = Query::insert("tags").with_assignment("red", 9).with_assignment("green", 3);
        let written = apply(&store, &catalog, &query).unwrap();

        assert_eq!(written, vec!["tags:green".to_string()]);
        assert_eq!(store.get("tags:red").unwrap(), Some(Value::Int64(1)));
        assert_eq!(store.get("tags:green").unwrap(), Some(Value::Int64(3)));
    }

    #[test]
    fn test_invalid_score_writes_nothing() {
        let (store, catalog) = setup();

        let query = Query::insert("board")
            .with_assignment("alice", 1.5)
            .with_assignment("bob", true);
        let err = apply(&store, &catalog, &query).unwrap_err();

        assert!(matches!(err, Error::MalformedQuery { .. }));
        assert_eq!(store.zscore("board", "board:alice").unwrap(), None);
    }

    #[test]
    fn test_numeric_string_score_accepted() {
        let (store, catalog) = setup();

        let written = apply(&store, &catalog, &Query::replace("board").with_assignment("alice", "2.5")).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(store.zscore("board", "board:alice").unwrap(), Some(2.5));
    }

    #[test]
    fn test_delete_targets_selected_record() {
        let (store, catalog) = setup();

        let query = Query::delete("tags").with_predicate(Predicate::eq("tags", "key", "blue"));
        let removed = apply(&store, &catalog, &query).unwrap();

        assert_eq!(removed, vec!["tags:blue".to_string()]);
        assert_eq!(store.get("tags:blue").unwrap(), None);
        assert!(store.get("tags:red").unwrap().is_some());
    }

    #[test]
    fn test_every_structure_payload_is_written() {
        let (store, catalog) = setup();

        let written = apply(&store, &catalog, &Query::replace("users").with_assignment("name", "a")).unwrap();
        assert_eq!(written, vec!["users:name".to_string()]);
        assert_eq!(store.hget("users", "users:name").unwrap(), Some(Value::from("a")));

        let query = Query::update("tags")
            .with_predicate(Predicate::eq("tags", "key", "red"))
            .with_assignment("value", 5);
        assert_eq!(apply(&store, &catalog, &query).unwrap(), vec!["tags:red".to_string()]);
        assert_eq!(store.get("tags:red").unwrap(), Some(Value::Int64(5)));
    }

    #[test]
    fn test_update_wrong_column_is_malformed() {
        let (store, catalog) = setup();

        let query = Query::update("board").with_assignment("value", 1);
        assert!(matches!(
            apply(&store, &catalog, &query).unwrap_err(),
            Error::MalformedQuery { .. }
        ));
    }
}

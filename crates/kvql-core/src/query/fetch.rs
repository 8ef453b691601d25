//! Record selection: full scans and targeted fetches.

use kvql_proto::PredicateOp;
use tracing::debug;

use super::assembler::KEY_COLUMN;
use super::planner::SubjectPlan;
use super::scan::{RawRecords, ScanEngine};
use crate::storage::pattern::escape;
use crate::storage::{StoreError, StructureStore};
use crate::structure::StructureType;

/// Reads the records a subject plan selects.
///
/// A subject without predicates is read with a full scan of its prefix.
/// Otherwise each predicate is answered natively:
/// - `Match` scans with the entity prefix followed by the pattern.
/// - `Eq` on `key` addresses the record whose natural key is the predicate
///   value (`GET`, `SISMEMBER`, `HGET`, `ZSCORE`).
/// - Any other `Eq` on a hash reads the field named by the predicate column
///   and keeps it when every equality on that field holds.
///
/// The selected records are the union over all predicates.
pub struct RecordSelector<'a, S: StructureStore + ?Sized> {
    store: &'a S,
    page_size: usize,
}

impl<'a, S: StructureStore + ?Sized> RecordSelector<'a, S> {
    /// Create a selector.
    pub fn new(store: &'a S, page_size: usize) -> Self {
        Self { store, page_size }
    }

    /// Select the records of `plan`.
    pub fn select(&self, plan: &SubjectPlan<'_>) -> Result<RawRecords, StoreError> {
        let prefix = escape(&plan.entity.key_prefix());
        let container = plan.entity.container_key();
        let engine = ScanEngine::new(self.store, self.page_size);

        if plan.is_full_scan() {
            let pattern = format!("{}*", prefix);
            return engine.scan(plan.structure, container, &pattern);
        }

        let mut records = RawRecords::empty(plan.structure);
        let mut hash_fields: Vec<&str> = Vec::new();

        for predicate in &plan.predicates {
            match predicate.op {
                PredicateOp::Match => {
                    let pattern = format!("{}{}", prefix, predicate.value.as_str().unwrap_or_default());
                    records.merge(engine.scan(plan.structure, container, &pattern)?);
                }
                PredicateOp::Eq
                    if plan.structure == StructureType::Hash && predicate.column != KEY_COLUMN =>
                {
                    if !hash_fields.contains(&predicate.column.as_str()) {
                        hash_fields.push(&predicate.column);
                    }
                }
                PredicateOp::Eq => {
                    let name = plan.entity.record_name(&predicate.value.to_string());
                    records.merge(self.fetch_one(plan.structure, container, name)?);
                }
            }
        }

        for field in hash_fields {
            let name = plan.entity.record_name(field);
            if let Some(value) = self.store.hget(container, &name)? {
                let holds = plan
                    .predicates
                    .iter()
                    .filter(|p| p.op == PredicateOp::Eq && p.column == field)
                    .all(|p| p.value.loosely_equals(&value));
                if holds {
                    records.merge(RawRecords::Fields(vec![(name, value)]));
                }
            }
        }

        debug!(
            entity = %plan.entity.name,
            structure_type = %plan.structure,
            predicates = plan.predicates.len(),
            records = records.len(),
            "Targeted fetch complete"
        );
        Ok(records)
    }

    /// Fetch one addressable record of a list, set or sorted set.
    fn fetch_one(
        &self,
        structure: StructureType,
        container: &str,
        name: String,
    ) -> Result<RawRecords, StoreError> {
        let records = match structure {
            StructureType::List => match self.store.get(&name)? {
                Some(value) => RawRecords::List(vec![(name, value)]),
                None => RawRecords::List(vec![]),
            },
            StructureType::Set => {
                if self.store.sismember(container, &name)? {
                    RawRecords::Members(vec![name])
                } else {
                    RawRecords::Members(vec![])
                }
            }
            StructureType::SortedSet => match self.store.zscore(container, &name)? {
                Some(score) => RawRecords::Scores(vec![(name, score)]),
                None => RawRecords::Scores(vec![]),
            },
            StructureType::Hash => match self.store.hget(container, &name)? {
                Some(value) => RawRecords::Fields(vec![(name, value)]),
                None => RawRecords::Fields(vec![]),
            },
        };
        Ok(records)
    }
}

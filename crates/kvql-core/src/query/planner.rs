//! Per-subject grouping and validation of query conditions.
//!
//! Planning is pure: it reads the query, the catalog and the execution
//! context, and never touches the store.

use kvql_proto::{Predicate, PredicateOp, Query};

use super::assembler::KEY_COLUMN;
use crate::catalog::{Catalog, EntityDef};
use crate::error::Error;
use crate::structure::{StructureType, StructureTypeResolver};

/// Everything needed to evaluate one subject.
#[derive(Debug, Clone)]
pub struct SubjectPlan<'q> {
    /// Subject alias.
    pub alias: &'q str,
    /// Entity the subject refers to.
    pub entity: EntityDef,
    /// Structure backing the entity.
    pub structure: StructureType,
    /// Predicates restricting this subject, in query order.
    pub predicates: Vec<&'q Predicate>,
    /// Projected columns, in query order. Empty means all columns.
    pub columns: Vec<&'q str>,
}

impl SubjectPlan<'_> {
    /// Whether the subject is read with a full scan.
    pub fn is_full_scan(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Subjects of a query in join order, each with its conditions.
#[derive(Debug, Clone)]
pub struct FilterGroups<'q> {
    subjects: Vec<SubjectPlan<'q>>,
}

impl<'q> FilterGroups<'q> {
    /// The primary (first declared) subject.
    pub fn primary(&self) -> &SubjectPlan<'q> {
        // Planning rejects queries without subjects
        &self.subjects[0]
    }

    /// Get a subject by alias.
    pub fn get(&self, alias: &str) -> Option<&SubjectPlan<'q>> {
        self.subjects.iter().find(|s| s.alias == alias)
    }

    /// Iterate over subjects in join order.
    pub fn iter(&self) -> impl Iterator<Item = &SubjectPlan<'q>> {
        self.subjects.iter()
    }

    /// Consume into subjects in join order.
    pub fn into_subjects(self) -> Vec<SubjectPlan<'q>> {
        self.subjects
    }

    /// Get the number of subjects.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Check if there are no subjects.
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Text used to identify a query in errors and logs.
pub(crate) fn query_label(query: &Query) -> String {
    if !query.text.is_empty() {
        return query.text.clone();
    }
    let entities: Vec<&str> = query.subjects.iter().map(|s| s.entity.as_str()).collect();
    format!("{} {}", query.action, entities.join(", "))
}

/// Whether `structure` can evaluate `predicate` natively.
///
/// Every structure addresses records by natural key, so `key` is always
/// filterable. Hashes also compare the value of the field named by the
/// column; payload columns are never filterable.
fn filterable(structure: StructureType, predicate: &Predicate) -> bool {
    if predicate.column == KEY_COLUMN {
        return true;
    }
    predicate.op == PredicateOp::Eq
        && structure == StructureType::Hash
        && structure.payload_column() != Some(predicate.column.as_str())
}

/// Groups predicates and columns by subject and checks structure limits.
pub struct FilterPlanner<'a> {
    catalog: &'a Catalog,
    resolver: &'a StructureTypeResolver,
    storage: &'a str,
}

impl<'a> FilterPlanner<'a> {
    /// Create a planner.
    pub fn new(catalog: &'a Catalog, resolver: &'a StructureTypeResolver, storage: &'a str) -> Self {
        Self {
            catalog,
            resolver,
            storage,
        }
    }

    /// Plan `query`.
    ///
    /// `main_entity`, when given, is used for the primary subject instead of
    /// the catalog entry.
    pub fn plan<'q>(
        &self,
        query: &'q Query,
        main_entity: Option<&EntityDef>,
    ) -> Result<FilterGroups<'q>, Error> {
        if query.subjects.is_empty() {
            return Err(Error::NoSubjects {
                storage: self.storage.to_string(),
                query: query_label(query),
            });
        }

        let label = query_label(query);
        let mut subjects: Vec<SubjectPlan<'q>> = Vec::with_capacity(query.subjects.len());
        for (index, subject) in query.subjects.iter().enumerate() {
            if subjects.iter().any(|s| s.alias == subject.alias) {
                return Err(self.malformed(query, format!("duplicate subject alias {}", subject.alias)));
            }

            let entity = match main_entity {
                Some(entity) if index == 0 => entity.clone(),
                _ => self.catalog.get_entity(&subject.entity).ok_or_else(|| Error::UnknownEntity {
                    entity: subject.entity.clone(),
                    storage: self.storage.to_string(),
                    query: label.clone(),
                })?,
            };
            let structure = self.resolver.resolve_strict(&entity, self.storage, &label)?;

            subjects.push(SubjectPlan {
                alias: &subject.alias,
                entity,
                structure,
                predicates: Vec::new(),
                columns: Vec::new(),
            });
        }

        for predicate in &query.predicates {
            if predicate.op == PredicateOp::Match && predicate.value.as_str().is_none() {
                return Err(self.malformed(
                    query,
                    format!("match pattern for {} must be a string", predicate.subject),
                ));
            }
            let plan = subjects
                .iter_mut()
                .find(|s| s.alias == predicate.subject)
                .ok_or_else(|| self.malformed(query, format!("unknown subject {}", predicate.subject)))?;
            plan.predicates.push(predicate);
        }

        for column in &query.columns {
            let plan = subjects
                .iter_mut()
                .find(|s| s.alias == column.subject)
                .ok_or_else(|| self.malformed(query, format!("unknown subject {}", column.subject)))?;
            let known = column.column == KEY_COLUMN
                || plan.structure.payload_column() == Some(column.column.as_str());
            if !known {
                return Err(self.malformed(
                    query,
                    format!("{} has no column {}", plan.structure, column.column),
                ));
            }
            plan.columns.push(&column.column);
        }

        for plan in &subjects {
            if plan.predicates.len() > 1 && !plan.structure.supports_multiple_filters() {
                return Err(Error::TooManyFilters {
                    structure_type: plan.structure.to_string(),
                    subject: plan.alias.to_string(),
                    count: plan.predicates.len(),
                    storage: self.storage.to_string(),
                    query: label,
                });
            }
        }

        for plan in &subjects {
            if let Some(predicate) = plan.predicates.iter().find(|p| !filterable(plan.structure, p)) {
                return Err(Error::UnsupportedFilter {
                    column: predicate.column.clone(),
                    structure_type: plan.structure.to_string(),
                    subject: plan.alias.to_string(),
                    storage: self.storage.to_string(),
                    query: label,
                });
            }
        }

        Ok(FilterGroups { subjects })
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
    use crate::error::ErrorKind;

    fn test_catalog() -> Catalog {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let catalog = Catalog::open(&db).unwrap();
        catalog
            .register(EntityDef::new("orders").with_structure(StructureType::Set))
            .unwrap();
        catalog.register(EntityDef::new("users")).unwrap();
        catalog
            .register(EntityDef::new("tags").with_structure(StructureType::List))
            .unwrap();
        catalog
    }

    #[test]
    fn test_groups_by_alias() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let query = Query::select("users")
            .join("o", "orders")
            .with_predicate(Predicate::eq("users", "name", "a"))
            .with_predicate(Predicate::eq("users", "age", "30"))
            .with_predicate(Predicate::eq("o", "key", "1"))
            .with_column("users", "value");

        let groups = planner.plan(&query, None).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.primary().alias, "users");
        assert_eq!(groups.primary().structure, StructureType::Hash);
        assert_eq!(groups.primary().predicates.len(), 2);
        assert_eq!(groups.primary().columns, vec!["value"]);

        let orders = groups.get("o").unwrap();
        assert_eq!(orders.structure, StructureType::Set);
        assert_eq!(orders.predicates.len(), 1);
        assert!(orders.columns.is_empty());
    }

    #[test]
    fn test_every_alias_has_an_entry() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let query = Query::select("orders").join("t", "tags");
        let groups = planner.plan(&query, None).unwrap();

        let aliases: Vec<&str> = groups.iter().map(|s| s.alias).collect();
        assert_eq!(aliases, vec!["orders", "t"]);
        assert!(groups.iter().all(|s| s.is_full_scan()));
    }

    #[test]
    fn test_no_subjects() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let err = planner.plan(&Query::new("SELECT"), None).unwrap_err();
        assert!(matches!(err, Error::NoSubjects { .. }));
        assert_eq!(err.kind(), ErrorKind::MalformedQuery);
    }

    #[test]
    fn test_multiple_filters_rejected_for_non_hash() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let query = Query::select("users")
            .join("o", "orders")
            .with_predicate(Predicate::eq("o", "key", "1"))
            .with_predicate(Predicate::eq("o", "key", "2"));

        let err = planner.plan(&query, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityViolation);
        assert_eq!(err.field("structureType").as_deref(), Some("SET"));
        assert_eq!(err.field("subject").as_deref(), Some("o"));
    }

    #[test]
    fn test_main_entity_overrides_primary() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let adhoc = EntityDef::new("scratch").with_structure(StructureType::SortedSet);
        let query = Query::select("scratch");

        assert!(matches!(
            planner.plan(&query, None).unwrap_err(),
            Error::UnknownEntity { .. }
        ));
        let groups = planner.plan(&query, Some(&adhoc)).unwrap();
        assert_eq!(groups.primary().structure, StructureType::SortedSet);
    }

    #[test]
    fn test_unknown_alias_is_malformed() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let query = Query::select("users").with_predicate(Predicate::eq("nobody", "x", 1));
        let err = planner.plan(&query, None).unwrap_err();
        assert!(matches!(err, Error::MalformedQuery { .. }));

        let query = Query::select("users").with_column("nobody", "key");
        assert!(matches!(
            planner.plan(&query, None).unwrap_err(),
            Error::MalformedQuery { .. }
        ));

        let query = Query::select("orders").with_column("orders", "value");
        assert!(matches!(
            planner.plan(&query, None).unwrap_err(),
            Error::MalformedQuery { .. }
        ));
    }

    #[test]
    fn test_payload_columns_are_not_filterable() {
        let catalog = test_catalog();
        catalog
            .register(EntityDef::new("board").with_structure(StructureType::SortedSet))
            .unwrap();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        let query = Query::select("board").with_predicate(Predicate::eq("board", "score", 7.5));
        let err = planner.plan(&query, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityViolation);
        assert_eq!(err.field("column").as_deref(), Some("score"));
        assert_eq!(err.field("structureType").as_deref(), Some("SORTED_SET"));

        let query = Query::select("tags").with_predicate(Predicate::eq("tags", "value", "red"));
        let err = planner.plan(&query, None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilter { ref subject, .. } if subject == "tags"));

        let query = Query::select("users").with_predicate(Predicate::eq("users", "value", "a"));
        assert!(matches!(
            planner.plan(&query, None).unwrap_err(),
            Error::UnsupportedFilter { .. }
        ));
    }

    #[test]
    fn test_filterable_columns() {
        let catalog = test_catalog();
        let resolver = StructureTypeResolver::default();
        let planner = FilterPlanner::new(&catalog, &resolver, "kv");

        // Non-hash structures only filter on the natural key
        let query = Query::select("orders").with_predicate(Predicate::eq("orders", "name", "a"));
        assert!(matches!(
            planner.plan(&query, None).unwrap_err(),
            Error::UnsupportedFilter { .. }
        ));

        let query = Query::select("users")
            .with_predicate(Predicate::eq("users", "key", "name"))
            .with_predicate(Predicate::eq("users", "age", "30"))
            .with_predicate(Predicate::matches("users", "c*"));
        assert_eq!(planner.plan(&query, None).unwrap().primary().predicates.len(), 3);
    }

    #[test]
    fn test_query_label_falls_back_to_action() {
        let query = Query::select("users").join("o", "orders");
        assert_eq!(query_label(&query), "SELECT users, orders");
        assert_eq!(query_label(&query.with_text("SELECT * FROM users")), "SELECT * FROM users");
    }
}

//! Engine error types.
//!
//! Every error carries a message template plus the named fields that fill it,
//! so callers can render or log failures without parsing strings.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The query names no subjects.
    #[error("Query on storage {storage} has no subjects: {query}")]
    NoSubjects {
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// The query is structurally invalid.
    #[error("Malformed query: {reason}")]
    MalformedQuery {
        /// What is wrong with the query.
        reason: String,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// The action tag is not one the engine dispatches.
    #[error("Unknown query action: {action}")]
    UnknownAction {
        /// The offending action tag.
        action: String,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// A subject references an entity missing from the catalog.
    #[error("Unknown entity: {entity}")]
    UnknownEntity {
        /// Entity name.
        entity: String,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// More predicates on one subject than the structure can evaluate.
    #[error("multiple filters are not supported for {structure_type} structure type")]
    TooManyFilters {
        /// Structure type of the subject.
        structure_type: String,
        /// Subject alias.
        subject: String,
        /// Number of predicates given.
        count: usize,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// The action cannot be applied to the structure.
    #[error("{action} is not supported for {structure_type} structure type")]
    UnsupportedAction {
        /// Action tag.
        action: String,
        /// Structure type of the subject.
        structure_type: String,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// A predicate names a column the structure cannot filter on.
    #[error("filter on column {column} is not supported for {structure_type} structure type")]
    UnsupportedFilter {
        /// Column the predicate names.
        column: String,
        /// Structure type of the subject.
        structure_type: String,
        /// Subject alias.
        subject: String,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// An entity names a structure type that does not exist.
    #[error("Unknown structure type {structure_type} for entity {entity}")]
    UnknownStructureType {
        /// The unrecognized option value.
        structure_type: String,
        /// Entity name.
        entity: String,
        /// Storage name.
        storage: String,
        /// Query text.
        query: String,
    },

    /// The store failed during a scan, fetch, write or handle acquisition.
    #[error("Storage {storage} backend failure: {source}")]
    Backend {
        /// Storage name.
        storage: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

/// Error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Query is structurally invalid.
    MalformedQuery,
    /// Query asks for something the structure cannot do.
    CapabilityViolation,
    /// Entity names an unknown structure type.
    UnknownStructure,
    /// Store failure.
    Backend,
}

/// Structured, serializable view of an [`Error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Error category.
    pub kind: ErrorKind,
    /// Message template with `{field}` placeholders.
    pub template: &'static str,
    /// Named fields.
    pub fields: BTreeMap<&'static str, String>,
    /// Rendered message.
    pub message: String,
}

impl Error {
    /// Wrap a store failure.
    pub fn backend(storage: impl Into<String>, source: StoreError) -> Self {
        Error::Backend {
            storage: storage.into(),
            source,
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoSubjects { .. }
            | Error::MalformedQuery { .. }
            | Error::UnknownAction { .. }
            | Error::UnknownEntity { .. } => ErrorKind::MalformedQuery,
            Error::TooManyFilters { .. }
            | Error::UnsupportedAction { .. }
            | Error::UnsupportedFilter { .. } => ErrorKind::CapabilityViolation,
            Error::UnknownStructureType { .. } => ErrorKind::UnknownStructure,
            Error::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Message template. Placeholders name entries of [`Error::fields`].
    pub fn template(&self) -> &'static str {
        match self {
            Error::NoSubjects { .. } => "Query on storage {storage} has no subjects: {query}",
            Error::MalformedQuery { .. } => "Malformed query: {reason}",
            Error::UnknownAction { .. } => "Unknown query action: {action}",
            Error::UnknownEntity { .. } => "Unknown entity: {entity}",
            Error::TooManyFilters { .. } => {
                "multiple filters are not supported for {structureType} structure type"
            }
            Error::UnsupportedAction { .. } => {
                "{action} is not supported for {structureType} structure type"
            }
            Error::UnsupportedFilter { .. } => {
                "filter on column {column} is not supported for {structureType} structure type"
            }
            Error::UnknownStructureType { .. } => {
                "Unknown structure type {structureType} for entity {entity}"
            }
            Error::Backend { .. } => "Storage {storage} backend failure: {cause}",
        }
    }

    /// Named fields of this error.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Error::NoSubjects { storage, query } => {
                vec![("storage", storage.clone()), ("query", query.clone())]
            }
            Error::MalformedQuery {
                reason,
                storage,
                query,
            } => vec![
                ("reason", reason.clone()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::UnknownAction {
                action,
                storage,
                query,
            } => vec![
                ("action", action.clone()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::UnknownEntity {
                entity,
                storage,
                query,
            } => vec![
                ("entity", entity.clone()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::TooManyFilters {
                structure_type,
                subject,
                count,
                storage,
                query,
            } => vec![
                ("structureType", structure_type.clone()),
                ("subject", subject.clone()),
                ("count", count.to_string()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::UnsupportedAction {
                action,
                structure_type,
                storage,
                query,
            } => vec![
                ("action", action.clone()),
                ("structureType", structure_type.clone()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::UnsupportedFilter {
                column,
                structure_type,
                subject,
                storage,
                query,
            } => vec![
                ("column", column.clone()),
                ("structureType", structure_type.clone()),
                ("subject", subject.clone()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::UnknownStructureType {
                structure_type,
                entity,
                storage,
                query,
            } => vec![
                ("structureType", structure_type.clone()),
                ("entity", entity.clone()),
                ("storage", storage.clone()),
                ("query", query.clone()),
            ],
            Error::Backend { storage, source } => {
                vec![("storage", storage.clone()), ("cause", source.to_string())]
            }
        }
    }

    /// Look up one named field.
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Build the structured report for this error.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            template: self.template(),
            fields: self.fields().into_iter().collect(),
            message: self.to_string(),
        }
    }
}

impl ErrorReport {
    /// Fill the template from the fields.
    pub fn render(&self) -> String {
        let mut rendered = self.template.to_string();
        for (name, value) in &self.fields {
            rendered = rendered.replace(&format!("{{{}}}", name), value);
        }
        rendered
    }
}

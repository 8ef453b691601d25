//! Native structure types and the resolver that maps entities onto them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::EntityDef;
use crate::error::Error;

/// Option namespace for key-value backend settings.
pub const KV_NAMESPACE: &str = "kv";

/// Option key selecting the structure type.
pub const STRUCTURE_TYPE_OPTION: &str = "type";

/// Option key naming the container of set, hash and sorted-set entities.
pub const CONTAINER_KEY_OPTION: &str = "key";

/// The native container backing an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    /// One top-level scalar key per record.
    List,
    /// Members of one set.
    Set,
    /// Fields of one hash.
    Hash,
    /// Scored members of one sorted set.
    SortedSet,
}

impl StructureType {
    /// The option value naming this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureType::List => "list",
            StructureType::Set => "set",
            StructureType::Hash => "hash",
            StructureType::SortedSet => "zset",
        }
    }

    /// Parse an option value, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "list" => Some(StructureType::List),
            "set" => Some(StructureType::Set),
            "hash" => Some(StructureType::Hash),
            "zset" => Some(StructureType::SortedSet),
            _ => None,
        }
    }

    /// Whether more than one predicate can be evaluated against this type.
    pub fn supports_multiple_filters(&self) -> bool {
        matches!(self, StructureType::Hash)
    }

    /// Column carrying the writable payload of a record, if any.
    pub fn payload_column(&self) -> Option<&'static str> {
        match self {
            StructureType::List | StructureType::Hash => Some("value"),
            StructureType::SortedSet => Some("score"),
            StructureType::Set => None,
        }
    }
}

impl Default for StructureType {
    fn default() -> Self {
        StructureType::Hash
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureType::List => "LIST",
            StructureType::Set => "SET",
            StructureType::Hash => "HASH",
            StructureType::SortedSet => "SORTED_SET",
        };
        f.write_str(name)
    }
}

/// Maps entities to their structure type.
#[derive(Debug, Clone, Default)]
pub struct StructureTypeResolver {
    strict: bool,
}

impl StructureTypeResolver {
    /// Create a resolver. A strict resolver rejects unrecognized option values.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Resolve the structure type of `entity`.
    ///
    /// Missing or unrecognized values fall back to [`StructureType::Hash`].
    pub fn resolve(&self, entity: &EntityDef) -> StructureType {
        match entity.option(KV_NAMESPACE, STRUCTURE_TYPE_OPTION) {
            None => StructureType::default(),
            Some(value) => StructureType::parse(value).unwrap_or_else(|| {
                warn!(
                    entity = %entity.name,
                    value,
                    "Unrecognized structure type, defaulting to hash"
                );
                StructureType::default()
            }),
        }
    }

    /// Resolve, honouring strict mode. `storage` and `query` label the error.
    pub fn resolve_strict(
        &self,
        entity: &EntityDef,
        storage: &str,
        query: &str,
    ) -> Result<StructureType, Error> {
        if !self.strict {
            return Ok(self.resolve(entity));
        }
        match entity.option(KV_NAMESPACE, STRUCTURE_TYPE_OPTION) {
            None => Ok(StructureType::default()),
            Some(value) => StructureType::parse(value).ok_or_else(|| Error::UnknownStructureType {
                structure_type: value.to_string(),
                entity: entity.name.clone(),
                storage: storage.to_string(),
                query: query.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(StructureType::parse("LIST"), Some(StructureType::List));
        assert_eq!(StructureType::parse("zset"), Some(StructureType::SortedSet));
        assert_eq!(StructureType::parse("sorted_set"), None);
        assert_eq!(StructureType::SortedSet.to_string(), "SORTED_SET");
        assert_eq!(StructureType::SortedSet.as_str(), "zset");
    }

    #[test]
    fn test_resolver_defaults_to_hash() {
        let resolver = StructureTypeResolver::default();

        assert_eq!(resolver.resolve(&EntityDef::new("users")), StructureType::Hash);
        let odd = EntityDef::new("odd").with_option("kv", "type", "tree");
        assert_eq!(resolver.resolve(&odd), StructureType::Hash);

        let orders = EntityDef::new("orders").with_structure(StructureType::Set);
        assert_eq!(resolver.resolve(&orders), StructureType::Set);

        // Other namespaces are ignored
        let other = EntityDef::new("x").with_option("sql", "type", "list");
        assert_eq!(resolver.resolve(&other), StructureType::Hash);
    }

    #[test]
    fn test_strict_resolver() {
        let odd = EntityDef::new("odd").with_option("kv", "type", "tree");

        assert_eq!(
            StructureTypeResolver::new(false).resolve_strict(&odd, "kv", "SELECT odd").unwrap(),
            StructureType::Hash
        );

        let err = StructureTypeResolver::new(true)
            .resolve_strict(&odd, "kv", "SELECT odd")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownStructure);
        assert_eq!(err.field("query").as_deref(), Some("SELECT odd"));
        assert!(err.to_string().contains("tree"));

        let plain = EntityDef::new("plain");
        assert_eq!(
            StructureTypeResolver::new(true).resolve_strict(&plain, "kv", "SELECT plain").unwrap(),
            StructureType::Hash
        );
    }
}

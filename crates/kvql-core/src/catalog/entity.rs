//! Entity definitions.

use std::collections::BTreeMap;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::structure::{StructureType, CONTAINER_KEY_OPTION, KV_NAMESPACE, STRUCTURE_TYPE_OPTION};

/// A logical table backed by one native structure.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct EntityDef {
    /// Entity name (unique within the catalog).
    pub name: String,
    /// Prefix prepended to every record name. `None` means `"<name>:"`.
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Backend options, `namespace -> key -> value`.
    #[serde(default)]
    pub options: BTreeMap<String, BTreeMap<String, String>>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_prefix: None,
            options: BTreeMap::new(),
        }
    }

    /// Set an explicit key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set a backend option.
    pub fn with_option(
        mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.options
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Declare the backing structure type.
    pub fn with_structure(self, structure: StructureType) -> Self {
        self.with_option(KV_NAMESPACE, STRUCTURE_TYPE_OPTION, structure.as_str())
    }

    /// Name the container key for set, hash and sorted-set entities.
    pub fn with_container_key(self, key: impl Into<String>) -> Self {
        self.with_option(KV_NAMESPACE, CONTAINER_KEY_OPTION, key)
    }

    /// Look up a backend option.
    pub fn option(&self, namespace: &str, key: &str) -> Option<&str> {
        self.options
            .get(namespace)
            .and_then(|opts| opts.get(key))
            .map(String::as_str)
    }

    /// The effective key prefix.
    pub fn key_prefix(&self) -> String {
        match &self.key_prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}:", self.name),
        }
    }

    /// The key of the container holding this entity's records.
    pub fn container_key(&self) -> &str {
        self.option(KV_NAMESPACE, CONTAINER_KEY_OPTION)
            .unwrap_or(&self.name)
    }

    /// Full record name for a natural key.
    pub fn record_name(&self, natural_key: &str) -> String {
        format!("{}{}", self.key_prefix(), natural_key)
    }

    /// Strip the entity prefix from a scanned name.
    pub fn natural_key<'a>(&self, name: &'a str) -> &'a str {
        let prefix = self.key_prefix();
        name.strip_prefix(prefix.as_str()).unwrap_or(name)
    }

    /// Serialize for catalog storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rkyv::rancor::Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self).map(|v| v.to_vec())
    }

    /// Deserialize from catalog storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rkyv::rancor::Error> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("orders")
            .with_structure(StructureType::Set)
            .with_container_key("orders:all");

        assert_eq!(entity.name, "orders");
        assert_eq!(entity.option("kv", "type"), Some("set"));
        assert_eq!(entity.option("kv", "missing"), None);
        assert_eq!(entity.option("other", "type"), None);
        assert_eq!(entity.container_key(), "orders:all");
    }

    #[test]
    fn test_key_prefix_defaults() {
        let entity = EntityDef::new("users");
        assert_eq!(entity.key_prefix(), "users:");
        assert_eq!(entity.container_key(), "users");
        assert_eq!(entity.record_name("42"), "users:42");

        let entity = entity.with_key_prefix("u/");
        assert_eq!(entity.key_prefix(), "u/");
        assert_eq!(entity.natural_key("u/42"), "42");
        assert_eq!(entity.natural_key("other"), "other");
    }

    #[test]
    fn test_entity_bytes_roundtrip() {
        let entity = EntityDef::new("board")
            .with_structure(StructureType::SortedSet)
            .with_key_prefix("b:");

        let bytes = entity.to_bytes().unwrap();
        assert_eq!(EntityDef::from_bytes(&bytes).unwrap(), entity);
    }

    #[test]
    fn test_entity_from_json() {
        let json = r#"{"name": "users", "options": {"kv": {"type": "hash"}}}"#;
        let entity: EntityDef = serde_json::from_str(json).unwrap();

        assert_eq!(entity.key_prefix, None);
        assert_eq!(entity.option("kv", "type"), Some("hash"));
    }
}

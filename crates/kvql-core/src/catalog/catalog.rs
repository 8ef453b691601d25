//! Catalog manager for storing and retrieving entity definitions.

use dashmap::DashMap;
use sled::{Db, Tree};
use tracing::debug;

use super::EntityDef;
use crate::storage::StoreError;

/// Tree name for entity definitions.
const ENTITY_TREE: &str = "catalog:entities";

/// Persisted entity catalog with an in-memory cache.
pub struct Catalog {
    /// Entity definitions tree, keyed by entity name.
    entity_tree: Tree,
    /// Cached definitions.
    entities: DashMap<String, EntityDef>,
}

impl Catalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self, StoreError> {
        let entity_tree = db.open_tree(ENTITY_TREE)?;
        let entities = DashMap::new();

        for result in entity_tree.iter() {
            let (_, bytes) = result?;
            let entity = EntityDef::from_bytes(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            entities.insert(entity.name.clone(), entity);
        }

        debug!(entities = entities.len(), "Opened catalog");
        Ok(Self {
            entity_tree,
            entities,
        })
    }

    /// Register or replace an entity definition.
    pub fn register(&self, entity: EntityDef) -> Result<(), StoreError> {
        let bytes = entity
            .to_bytes()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.entity_tree.insert(entity.name.as_bytes(), bytes)?;
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Register every entity in a JSON array. Returns how many were registered.
    pub fn load_json(&self, json: &str) -> Result<usize, StoreError> {
        let entities: Vec<EntityDef> =
            serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let count = entities.len();
        for entity in entities {
            self.register(entity)?;
        }
        Ok(count)
    }

    /// Remove an entity definition. Returns whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        self.entity_tree.remove(name.as_bytes())?;
        Ok(self.entities.remove(name).is_some())
    }

    /// Get an entity definition by name.
    pub fn get_entity(&self, name: &str) -> Option<EntityDef> {
        self.entities.get(name).map(|entry| entry.value().clone())
    }

    /// List all entity names, sorted.
    pub fn list_entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.entity_tree.flush()?;
        Ok(())
    }
}

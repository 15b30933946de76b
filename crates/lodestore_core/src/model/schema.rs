//! Store schema description.
//!
//! # Responsibility
//! - Parse the JSON schema file that declares a store's entities.
//! - Produce the entity-type to collection map a store resolves against.
//!
//! # Invariants
//! - Type names and collection names are unique within one schema.
//! - A missing `collection` falls back to the type name.

use crate::model::entity::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Schema-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema declares no entities")]
    Empty,
    #[error("entity type name cannot be blank")]
    BlankTypeName,
    #[error("collection name for `{0}` cannot be blank")]
    BlankCollection(String),
    #[error("entity type `{0}` is declared more than once")]
    DuplicateType(String),
    #[error("collection `{0}` is declared more than once")]
    DuplicateCollection(String),
}

/// One entity declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl EntitySchema {
    pub fn new(type_name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            collection: Some(collection.into()),
        }
    }

    /// Collection name used for persisted rows of this type.
    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.type_name)
    }
}

/// Full schema of one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub entities: Vec<EntitySchema>,
}

impl StoreSchema {
    pub fn new(entities: impl IntoIterator<Item = EntitySchema>) -> Self {
        Self {
            entities: entities.into_iter().collect(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Checks naming invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.entities.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut types = BTreeSet::new();
        let mut collections = BTreeSet::new();
        for entity in &self.entities {
            let type_name = entity.type_name.trim();
            if type_name.is_empty() {
                return Err(SchemaError::BlankTypeName);
            }
            let collection = entity.collection_name().trim();
            if collection.is_empty() {
                return Err(SchemaError::BlankCollection(type_name.to_string()));
            }
            if !types.insert(type_name) {
                return Err(SchemaError::DuplicateType(type_name.to_string()));
            }
            if !collections.insert(collection) {
                return Err(SchemaError::DuplicateCollection(collection.to_string()));
            }
        }

        Ok(())
    }

    /// Maps each declared type to its collection.
    pub fn entity_map(&self) -> BTreeMap<EntityType, String> {
        self.entities
            .iter()
            .map(|entity| {
                (
                    EntityType::named(entity.type_name.trim()),
                    entity.collection_name().trim().to_string(),
                )
            })
            .collect()
    }
}

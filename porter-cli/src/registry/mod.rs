//! Entity registry: per-entity schema metadata consumed by the resolver,
//! importer and exporter

mod models;

pub use models::*;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Source of entity descriptors.
///
/// Injected into the resolver and engines; nothing in Porter looks entities
/// up through global state.
pub trait EntityRegistry: Send + Sync {
    /// Descriptor for an entity type name
    fn describe(&self, entity_name: &str) -> Option<&EntityDescriptor>;

    /// All entity names this registry knows, sorted
    fn known_entity_names(&self) -> Vec<String>;

    /// Descriptor owning a storage name
    fn describe_storage(&self, storage_name: &str) -> Option<&EntityDescriptor> {
        self.known_entity_names()
            .into_iter()
            .find_map(|name| self.describe(&name).filter(|d| d.storage_name == storage_name))
    }
}

/// Registry backed by a fixed list of descriptors
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    entities: BTreeMap<String, EntityDescriptor>,
}

/// On-disk schema file layout
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "entity", alias = "entities")]
    entities: Vec<EntityDescriptor>,
}

impl StaticRegistry {
    /// Build a registry, rejecting duplicate entity or storage names
    pub fn new(descriptors: Vec<EntityDescriptor>) -> Result<Self> {
        let mut entities = BTreeMap::new();
        let mut storage_names = HashSet::new();

        for descriptor in descriptors {
            if !storage_names.insert(descriptor.storage_name.clone()) {
                anyhow::bail!(
                    "Storage name '{}' is declared by more than one entity",
                    descriptor.storage_name
                );
            }
            if entities.contains_key(&descriptor.name) {
                anyhow::bail!("Entity '{}' is declared more than once", descriptor.name);
            }
            entities.insert(descriptor.name.clone(), descriptor);
        }

        Ok(StaticRegistry { entities })
    }

    /// Load a schema file; the format is chosen by extension (toml, yaml/yml, json)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let schema: SchemaFile = match extension.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML schema: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON schema: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Invalid TOML schema: {}", path.display()))?,
        };

        log::info!(
            "Loaded {} entity descriptors from {}",
            schema.entities.len(),
            path.display()
        );

        Self::new(schema.entities)
    }

    /// Parse a TOML schema document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let schema: SchemaFile = toml::from_str(content).context("Invalid TOML schema")?;
        Self::new(schema.entities)
    }
}

impl EntityRegistry for StaticRegistry {
    fn describe(&self, entity_name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(entity_name)
    }

    fn known_entity_names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    fn describe_storage(&self, storage_name: &str) -> Option<&EntityDescriptor> {
        self.entities
            .values()
            .find(|d| d.storage_name == storage_name)
    }
}

//! Entity schema metadata models

use serde::{Deserialize, Serialize};

/// Field names that are always treated as store-generated timestamps.
///
/// They are dropped on import and replaced by placeholders in templates.
pub const AUTO_GENERATED_FIELDS: &[&str] = &[
    "created_at",
    "updated_at",
    "created",
    "modified",
    "created_on",
    "modified_on",
    "date_created",
    "date_modified",
    "last_modified",
    "timestamp",
];

fn default_true() -> bool {
    true
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// How new primary identifiers are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Porter generates a v4 UUID when the record carries none
    #[default]
    Uuid,
    /// The store assigns the identifier on insert (e.g. INTEGER PRIMARY KEY)
    Store,
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    /// Storage name of the referenced table, for foreign keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// Alternative field names accepted on import
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub auto_generated: bool,
}

impl ColumnDescriptor {
    /// Create a nullable, non-unique column
    pub fn new(name: impl Into<String>) -> Self {
        ColumnDescriptor {
            name: name.into(),
            nullable: true,
            unique: false,
            foreign_key: None,
            aliases: Vec::new(),
            auto_generated: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn references(mut self, storage_name: impl Into<String>) -> Self {
        self.foreign_key = Some(storage_name.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }
}

/// Complete entity metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity type name, used as the top-level key of unit files
    pub name: String,
    /// Table name in the store
    pub storage_name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    /// Entity names this entity must be imported after
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Multi-column unique constraints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_together: Vec<Vec<String>>,
}

impl EntityDescriptor {
    /// Create a descriptor with an `id` primary key column
    pub fn new(name: impl Into<String>, storage_name: impl Into<String>) -> Self {
        EntityDescriptor {
            name: name.into(),
            storage_name: storage_name.into(),
            primary_key: default_primary_key(),
            id_strategy: IdStrategy::default(),
            columns: vec![ColumnDescriptor::new("id").required()],
            depends_on: Vec::new(),
            unique_together: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        self
    }

    pub fn with_dependency(mut self, entity_name: impl Into<String>) -> Self {
        self.depends_on.push(entity_name.into());
        self
    }

    pub fn with_unique_together(mut self, columns: &[&str]) -> Self {
        self.unique_together
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == self.primary_key || self.column(name).is_some()
    }

    /// Column name a field alias stands for, if `field` is an alias
    pub fn resolve_alias(&self, field: &str) -> Option<&str> {
        if self.column(field).is_some() {
            return None;
        }
        self.columns
            .iter()
            .find(|c| c.aliases.iter().any(|a| a == field))
            .map(|c| c.name.as_str())
    }

    /// Whether values for this field are produced by the store
    pub fn is_auto_generated(&self, field: &str) -> bool {
        AUTO_GENERATED_FIELDS.contains(&field)
            || self.column(field).is_some_and(|c| c.auto_generated)
    }

    /// Auto-generated columns in declaration order
    pub fn auto_generated_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| self.is_auto_generated(&c.name))
    }

    /// Foreign key columns targeting the given storage name
    pub fn foreign_keys_to(&self, storage_name: &str) -> Vec<&ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.foreign_key.as_deref() == Some(storage_name))
            .collect()
    }

    /// Field names that look like references to other rows
    pub fn is_foreign_key_shaped(&self, field: &str) -> bool {
        if field == self.primary_key {
            return false;
        }
        self.column(field).is_some_and(|c| c.foreign_key.is_some()) || field.ends_with("_id")
    }

    /// All unique constraints: single unique columns first, then
    /// `unique_together` sets. The primary key is never included.
    pub fn unique_constraints(&self) -> Vec<Vec<String>> {
        let mut constraints: Vec<Vec<String>> = self
            .columns
            .iter()
            .filter(|c| c.unique && c.name != self.primary_key)
            .map(|c| vec![c.name.clone()])
            .collect();

        for set in &self.unique_together {
            if set.is_empty() || set.contains(&self.primary_key) {
                continue;
            }
            if !constraints.contains(set) {
                constraints.push(set.clone());
            }
        }

        constraints
    }
}

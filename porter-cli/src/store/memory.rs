//! In-process store
//!
//! Tables live behind an `ArcSwap`. A transaction works on a private copy of
//! all tables and publishes it on commit, so a rolled-back transaction leaves
//! nothing behind. Constraints mirror what a relational store would enforce:
//! known columns, primary key uniqueness, unique constraints and not-null.
//! Foreign keys are not checked.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use super::{Criteria, RowQuery, Store, StoreError, StoreTransaction};
use crate::record::{Record, Value};
use crate::registry::{EntityRegistry, IdStrategy};

/// Constraint metadata for one table
#[derive(Debug, Clone)]
struct TableSchema {
    primary_key: String,
    id_strategy: IdStrategy,
    columns: HashSet<String>,
    required: Vec<String>,
    unique: Vec<Vec<String>>,
}

type Tables = BTreeMap<String, Vec<Record>>;

/// Store keeping all rows in memory
#[derive(Clone)]
pub struct MemoryStore {
    schemas: Arc<HashMap<String, TableSchema>>,
    tables: Arc<ArcSwap<Tables>>,
}

impl MemoryStore {
    /// Create empty tables for every entity the registry knows
    pub fn new(registry: &dyn EntityRegistry) -> Self {
        let mut schemas = HashMap::new();
        let mut tables = Tables::new();

        for name in registry.known_entity_names() {
            let Some(descriptor) = registry.describe(&name) else {
                continue;
            };

            let mut columns: HashSet<String> =
                descriptor.columns.iter().map(|c| c.name.clone()).collect();
            columns.insert(descriptor.primary_key.clone());

            let required = descriptor
                .columns
                .iter()
                .filter(|c| !c.nullable && c.name != descriptor.primary_key)
                .map(|c| c.name.clone())
                .collect();

            schemas.insert(
                descriptor.storage_name.clone(),
                TableSchema {
                    primary_key: descriptor.primary_key.clone(),
                    id_strategy: descriptor.id_strategy,
                    columns,
                    required,
                    unique: descriptor.unique_constraints(),
                },
            );
            tables.insert(descriptor.storage_name.clone(), Vec::new());
        }

        MemoryStore {
            schemas: Arc::new(schemas),
            tables: Arc::new(ArcSwap::from_pointee(tables)),
        }
    }

    /// Committed rows of a table, in insertion order
    pub fn rows(&self, storage: &str) -> Vec<Record> {
        self.tables
            .load()
            .get(storage)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert rows directly in a single committed transaction
    pub async fn seed(&self, storage: &str, records: Vec<Record>) -> Result<(), StoreError> {
        let primary_key = self
            .schemas
            .get(storage)
            .map(|s| s.primary_key.clone())
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))?;

        let mut tx = self.begin().await?;
        for record in &records {
            tx.insert(storage, &primary_key, record).await?;
        }
        tx.commit().await
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let working = Tables::clone(&self.tables.load());
        Ok(Box::new(MemoryTransaction {
            schemas: Arc::clone(&self.schemas),
            shared: Arc::clone(&self.tables),
            working,
            savepoints: Vec::new(),
        }))
    }

    async fn find_many(&self, storage: &str, query: &RowQuery) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.load();
        let rows = tables
            .get(storage)
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))?;

        let mut matched: Vec<Record> = rows
            .iter()
            .filter(|row| matches_criteria(row, &query.filter))
            .cloned()
            .collect();

        if let Some(column) = &query.order_by {
            matched.sort_by(|a, b| {
                let a = a.get(column).unwrap_or(&Value::Null);
                let b = b.get(column).unwrap_or(&Value::Null);
                a.compare(b)
            });
            if query.descending {
                matched.reverse();
            }
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn count(&self, storage: &str) -> Result<usize, StoreError> {
        self.tables
            .load()
            .get(storage)
            .map(|rows| rows.len())
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))
    }
}

/// Transaction over a private copy of the tables
struct MemoryTransaction {
    schemas: Arc<HashMap<String, TableSchema>>,
    shared: Arc<ArcSwap<Tables>>,
    working: Tables,
    savepoints: Vec<Tables>,
}

impl MemoryTransaction {
    fn schema(&self, storage: &str) -> Result<&TableSchema, StoreError> {
        self.schemas
            .get(storage)
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))
    }

    fn check_columns(schema: &TableSchema, storage: &str, record: &Record) -> Result<(), StoreError> {
        for field in record.field_names() {
            if !schema.columns.contains(field) {
                return Err(StoreError::UnknownColumn {
                    table: storage.to_string(),
                    column: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate a complete row against not-null and unique constraints.
    /// `skip` is the index of the row being replaced by an update.
    fn check_row(
        schema: &TableSchema,
        storage: &str,
        rows: &[Record],
        row: &Record,
        skip: Option<usize>,
    ) -> Result<(), StoreError> {
        for column in &schema.required {
            if row.get_present(column).is_none() {
                return Err(StoreError::Constraint(format!(
                    "NOT NULL constraint failed: {}.{}",
                    storage, column
                )));
            }
        }

        let mut keys = vec![vec![schema.primary_key.clone()]];
        keys.extend(schema.unique.iter().cloned());

        for key in &keys {
            let values: Vec<&Value> = key.iter().filter_map(|c| row.get_present(c)).collect();
            if values.len() != key.len() {
                continue;
            }
            let clash = rows.iter().enumerate().any(|(idx, other)| {
                Some(idx) != skip
                    && key
                        .iter()
                        .zip(&values)
                        .all(|(c, v)| other.get(c).is_some_and(|o| o.same_as(v)))
            });
            if clash {
                return Err(StoreError::Constraint(format!(
                    "UNIQUE constraint failed: {}.{}",
                    storage,
                    key.join(", ")
                )));
            }
        }

        Ok(())
    }

    fn position(rows: &[Record], primary_key: &str, id: &Value) -> Option<usize> {
        rows.iter()
            .position(|row| row.get(primary_key).is_some_and(|v| v.same_as(id)))
    }
}

fn matches_criteria(row: &Record, criteria: &Criteria) -> bool {
    criteria.iter().all(|(column, expected)| {
        row.get(column)
            .unwrap_or(&Value::Null)
            .same_as(expected)
    })
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_one(
        &mut self,
        storage: &str,
        criteria: &Criteria,
    ) -> Result<Option<Record>, StoreError> {
        let rows = self
            .working
            .get(storage)
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))?;
        Ok(rows.iter().find(|row| matches_criteria(row, criteria)).cloned())
    }

    async fn insert(
        &mut self,
        storage: &str,
        primary_key: &str,
        record: &Record,
    ) -> Result<Value, StoreError> {
        let schema = self.schema(storage)?.clone();
        Self::check_columns(&schema, storage, record)?;

        let rows = self
            .working
            .get_mut(storage)
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))?;

        let mut row = record.clone();
        let id = match row.get_present(primary_key) {
            Some(id) => id.clone(),
            None if schema.id_strategy == IdStrategy::Store => {
                let next = rows
                    .iter()
                    .filter_map(|r| r.get(primary_key).and_then(Value::as_int))
                    .max()
                    .unwrap_or(0)
                    + 1;
                row.insert_first(primary_key, next);
                Value::Int(next)
            }
            None => {
                return Err(StoreError::Constraint(format!(
                    "NOT NULL constraint failed: {}.{}",
                    storage, primary_key
                )));
            }
        };

        Self::check_row(&schema, storage, rows, &row, None)?;
        rows.push(row);
        Ok(id)
    }

    async fn update(
        &mut self,
        storage: &str,
        primary_key: &str,
        id: &Value,
        changes: &Record,
    ) -> Result<(), StoreError> {
        let schema = self.schema(storage)?.clone();
        Self::check_columns(&schema, storage, changes)?;

        let rows = self
            .working
            .get_mut(storage)
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))?;

        let idx = Self::position(rows, primary_key, id).ok_or_else(|| StoreError::RowNotFound {
            table: storage.to_string(),
            id: id.to_string(),
        })?;

        let mut updated = rows[idx].clone();
        for (field, value) in changes.iter() {
            updated.insert(field, value.clone());
        }

        Self::check_row(&schema, storage, rows, &updated, Some(idx))?;
        rows[idx] = updated;
        Ok(())
    }

    async fn delete(&mut self, storage: &str, primary_key: &str, id: &Value) -> Result<(), StoreError> {
        let rows = self
            .working
            .get_mut(storage)
            .ok_or_else(|| StoreError::UnknownTable(storage.to_string()))?;

        let idx = Self::position(rows, primary_key, id).ok_or_else(|| StoreError::RowNotFound {
            table: storage.to_string(),
            id: id.to_string(),
        })?;
        rows.remove(idx);
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.working.clone());
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        let saved = self
            .savepoints
            .pop()
            .ok_or_else(|| StoreError::Backend("no open savepoint".to_string()))?;
        self.working = saved;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend("no open savepoint".to_string()))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.shared.store(Arc::new(self.working));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

//! Persistent store abstraction
//!
//! The import engine only talks to a store through these traits:
//! - `Store` opens per-record transactions and serves exporter reads
//! - `StoreTransaction` performs lookups and mutations inside one transaction
//!
//! Two implementations ship with Porter: `SqliteStore` over sqlx and the
//! in-process `MemoryStore`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::record::{Record, Value};

/// Column/value pairs that must all match exactly
pub type Criteria = [(String, Value)];

/// Read query used by the exporter
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    /// Exact-match filter on column values
    pub filter: Vec<(String, Value)>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl RowQuery {
    /// Query for a single row by primary key
    pub fn by_key(primary_key: &str, id: &Value) -> Self {
        RowQuery {
            filter: vec![(primary_key.to_string(), id.clone())],
            order_by: None,
            descending: false,
            limit: Some(1),
        }
    }
}

/// Error raised by a store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Storage name does not exist
    UnknownTable(String),
    /// Column does not exist on the table
    UnknownColumn { table: String, column: String },
    /// Unique, not-null or foreign key violation
    Constraint(String),
    /// No row with the given identifier
    RowNotFound { table: String, id: String },
    /// Table or column name unusable in a statement
    InvalidIdentifier(String),
    /// Any other backend failure
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UnknownTable(table) => write!(f, "Unknown table '{}'", table),
            StoreError::UnknownColumn { table, column } => {
                write!(f, "Table '{}' has no column '{}'", table, column)
            }
            StoreError::Constraint(message) => write!(f, "Constraint violation: {}", message),
            StoreError::RowNotFound { table, id } => {
                write!(f, "No row in '{}' with identifier {}", table, id)
            }
            StoreError::InvalidIdentifier(name) => {
                write!(f, "'{}' is not a valid table or column name", name)
            }
            StoreError::Backend(message) => write!(f, "Store error: {}", message),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.kind() {
                    sqlx::error::ErrorKind::Other => {
                        if let Some(table) = message.strip_prefix("no such table: ") {
                            StoreError::UnknownTable(table.to_string())
                        } else {
                            StoreError::Backend(message)
                        }
                    }
                    _ => StoreError::Constraint(message),
                }
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// A persistent store holding one table per entity storage name
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction; one is used per imported record
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Read rows outside of any transaction
    async fn find_many(&self, storage: &str, query: &RowQuery) -> Result<Vec<Record>, StoreError>;

    /// Number of rows in a table
    async fn count(&self, storage: &str) -> Result<usize, StoreError>;
}

/// Lookups and mutations scoped to one transaction
#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_one(
        &mut self,
        storage: &str,
        criteria: &Criteria,
    ) -> Result<Option<Record>, StoreError>;

    /// Insert a row and return its identifier (assigned by the store when
    /// the record carries none)
    async fn insert(
        &mut self,
        storage: &str,
        primary_key: &str,
        record: &Record,
    ) -> Result<Value, StoreError>;

    async fn update(
        &mut self,
        storage: &str,
        primary_key: &str,
        id: &Value,
        changes: &Record,
    ) -> Result<(), StoreError>;

    async fn delete(&mut self, storage: &str, primary_key: &str, id: &Value) -> Result<(), StoreError>;

    /// Open a nested savepoint
    async fn savepoint(&mut self) -> Result<(), StoreError>;

    /// Undo everything since the innermost savepoint and close it
    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    /// Keep everything since the innermost savepoint and close it
    async fn release_savepoint(&mut self) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

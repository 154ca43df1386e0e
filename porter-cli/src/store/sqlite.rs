//! SQLite store over sqlx
//!
//! Statements are built at runtime from storage and column names, so every
//! name is validated and quoted before it reaches SQL. Values always travel
//! as bind parameters.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

use super::{Criteria, RowQuery, Store, StoreError, StoreTransaction};
use crate::record::{Record, Value};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Quote a table or column name, rejecting anything that is not a plain identifier
fn quote(name: &str) -> Result<String, StoreError> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::String(s) => query.bind(s.clone()),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Bool(b) => query.bind(*b),
        Value::DateTime(dt) => query.bind(dt.to_rfc3339()),
        Value::Guid(g) => query.bind(g.hyphenated().to_string()),
        Value::Json(j) => query.bind(j.to_string()),
    }
}

/// Build `WHERE` clause text and the values to bind, in order.
///
/// Null criteria become `IS NULL` and bind nothing.
fn where_clause<'a>(criteria: &'a Criteria) -> Result<(String, Vec<&'a Value>), StoreError> {
    if criteria.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut parts = Vec::with_capacity(criteria.len());
    let mut values = Vec::new();
    for (column, value) in criteria {
        if value.is_null() {
            parts.push(format!("{} IS NULL", quote(column)?));
        } else {
            parts.push(format!("{} = ?", quote(column)?));
            values.push(value);
        }
    }

    Ok((format!(" WHERE {}", parts.join(" AND ")), values))
}

/// Decode a row using each value's runtime storage class
fn decode_row(row: &SqliteRow) -> Result<Record, StoreError> {
    let mut record = Record::new();

    for column in row.columns() {
        let idx = column.ordinal();
        let (is_null, type_name) = {
            let raw = row.try_get_raw(idx)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };

        let value = if is_null {
            Value::Null
        } else {
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Int(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::Float(row.try_get::<f64, _>(idx)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(idx)?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::from_text(&row.try_get::<String, _>(idx)?),
            }
        };

        record.insert(column.name(), value);
    }

    Ok(record)
}

fn select_sql(storage: &str, criteria: &Criteria, query: Option<&RowQuery>) -> Result<String, StoreError> {
    let (clause, _) = where_clause(criteria)?;
    let mut sql = format!("SELECT * FROM {}{}", quote(storage)?, clause);

    if let Some(query) = query {
        if let Some(column) = &query.order_by {
            let direction = if query.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY {} {}", quote(column)?, direction));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
    } else {
        sql.push_str(" LIMIT 1");
    }

    Ok(sql)
}

/// Store backed by an SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to an SQLite URL (e.g. `sqlite://data.db` or `sqlite::memory:`)
    /// with foreign key enforcement on.
    ///
    /// Imports are strictly sequential, so the pool holds a single
    /// connection; this also keeps `:memory:` databases coherent.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL: {}", url))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", url))?;

        log::info!("Connected to {}", url);
        Ok(SqliteStore { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx, depth: 0 }))
    }

    async fn find_many(&self, storage: &str, query: &RowQuery) -> Result<Vec<Record>, StoreError> {
        let sql = select_sql(storage, &query.filter, Some(query))?;
        let (_, values) = where_clause(&query.filter)?;

        let mut statement = sqlx::query(&sql);
        for value in values {
            statement = bind_value(statement, value);
        }

        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn count(&self, storage: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote(storage)?);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")? as usize)
    }
}

/// One sqlx transaction
struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    /// Open savepoints
    depth: usize,
}

impl SqliteTransaction {
    async fn execute_raw(&mut self, sql: &str) -> Result<(), StoreError> {
        sqlx::query(sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    fn innermost_savepoint(&self) -> Result<String, StoreError> {
        if self.depth == 0 {
            return Err(StoreError::Backend("no open savepoint".to_string()));
        }
        Ok(format!("porter_{}", self.depth))
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn find_one(
        &mut self,
        storage: &str,
        criteria: &Criteria,
    ) -> Result<Option<Record>, StoreError> {
        let sql = select_sql(storage, criteria, None)?;
        let (_, values) = where_clause(criteria)?;

        let mut statement = sqlx::query(&sql);
        for value in values {
            statement = bind_value(statement, value);
        }

        let row = statement.fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn insert(
        &mut self,
        storage: &str,
        primary_key: &str,
        record: &Record,
    ) -> Result<Value, StoreError> {
        let sql = if record.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(storage)?)
        } else {
            let columns = record
                .field_names()
                .map(quote)
                .collect::<Result<Vec<_>, _>>()?;
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(storage)?,
                columns.join(", "),
                placeholders
            )
        };

        let mut statement = sqlx::query(&sql);
        for (_, value) in record.iter() {
            statement = bind_value(statement, value);
        }

        let result = statement.execute(&mut *self.tx).await?;

        Ok(match record.get_present(primary_key) {
            Some(id) => id.clone(),
            None => Value::Int(result.last_insert_rowid()),
        })
    }

    async fn update(
        &mut self,
        storage: &str,
        primary_key: &str,
        id: &Value,
        changes: &Record,
    ) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let assignments = changes
            .field_names()
            .map(|c| quote(c).map(|q| format!("{} = ?", q)))
            .collect::<Result<Vec<_>, _>>()?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(storage)?,
            assignments.join(", "),
            quote(primary_key)?
        );

        let mut statement = sqlx::query(&sql);
        for (_, value) in changes.iter() {
            statement = bind_value(statement, value);
        }
        statement = bind_value(statement, id);

        let result = statement.execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                table: storage.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&mut self, storage: &str, primary_key: &str, id: &Value) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(storage)?,
            quote(primary_key)?
        );

        let result = bind_value(sqlx::query(&sql), id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                table: storage.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        let name = format!("porter_{}", self.depth + 1);
        self.execute_raw(&format!("SAVEPOINT {}", name)).await?;
        self.depth += 1;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        let name = self.innermost_savepoint()?;
        self.execute_raw(&format!("ROLLBACK TO SAVEPOINT {}", name)).await?;
        self.execute_raw(&format!("RELEASE SAVEPOINT {}", name)).await?;
        self.depth -= 1;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        let name = self.innermost_savepoint()?;
        self.execute_raw(&format!("RELEASE SAVEPOINT {}", name)).await?;
        self.depth -= 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE widgets (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                price REAL,
                created_at TEXT
            )
            "#,
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query("CREATE TABLE counters (id INTEGER PRIMARY KEY, label TEXT)")
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_quote_rejects_injection() {
        assert_eq!(quote("widgets").unwrap(), "\"widgets\"");
        assert!(matches!(
            quote("widgets; DROP TABLE x"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_where_clause_null_criteria() {
        let criteria = vec![
            ("name".to_string(), Value::from("Gadget")),
            ("vendor".to_string(), Value::Null),
        ];
        let (clause, values) = where_clause(&criteria).unwrap();
        assert_eq!(clause, " WHERE \"name\" = ? AND \"vendor\" IS NULL");
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_find_roundtrip() {
        let store = store().await;
        let guid = uuid::Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let id = tx
            .insert(
                "widgets",
                "id",
                &record! { "id" => guid, "name" => "Gadget", "price" => 10i64 },
            )
            .await
            .unwrap();
        assert_eq!(id, Value::Guid(guid));
        tx.commit().await.unwrap();

        let rows = store
            .find_many("widgets", &RowQuery::by_key("id", &Value::Guid(guid)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Guid(guid)));
        assert!(rows[0].get("price").unwrap().same_as(&Value::Int(10)));
        assert_eq!(rows[0].get("created_at"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_constraint() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert("widgets", "id", &record! { "id" => "a", "name" => "Gadget" })
            .await
            .unwrap();
        let err = tx
            .insert("widgets", "id", &record! { "id" => "b", "name" => "Gadget" })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        tx.rollback().await.unwrap();

        assert_eq!(store.count("widgets").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rowid_assigned_when_key_missing() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        let id = tx
            .insert("counters", "id", &record! { "label" => "first" })
            .await
            .unwrap();
        assert_eq!(id, Value::Int(1));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_delete_missing_row() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update("widgets", "id", &Value::from("nope"), &record! { "price" => 1i64 })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound { .. }));

        let err = tx.delete("widgets", "id", &Value::from("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_savepoints_nest_inside_transaction() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();

        tx.savepoint().await.unwrap();
        tx.insert("widgets", "id", &record! { "id" => "a", "name" => "Gadget" })
            .await
            .unwrap();
        tx.release_savepoint().await.unwrap();

        tx.savepoint().await.unwrap();
        tx.insert("widgets", "id", &record! { "id" => "b", "name" => "Gizmo" })
            .await
            .unwrap();
        tx.rollback_to_savepoint().await.unwrap();

        // the released insert is still visible, the rolled back one is not
        assert!(tx.find_one("widgets", &vec![("id".to_string(), Value::from("a"))]).await.unwrap().is_some());
        assert!(tx.find_one("widgets", &vec![("id".to_string(), Value::from("b"))]).await.unwrap().is_none());
        assert!(matches!(tx.release_savepoint().await, Err(StoreError::Backend(_))));

        tx.rollback().await.unwrap();
        assert_eq!(store.count("widgets").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = store().await;
        let err = store.count("gizmos").await.unwrap_err();
        assert_eq!(err, StoreError::UnknownTable("gizmos".to_string()));
    }
}

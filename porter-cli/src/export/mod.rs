//! Export stored rows as import units
//!
//! Exported units have the exact shape the importer reads, so a file can be
//! edited and fed back in. Reference fields may be followed by a label hint
//! (`widget_id` then `widget_name`) that the importer drops.

mod format;

pub use format::ExportFormat;

use std::collections::BTreeMap;

use serde_json::json;

use crate::import::NATURAL_KEY_FIELDS;
use crate::record::{Record, Value};
use crate::registry::{AUTO_GENERATED_FIELDS, EntityDescriptor, EntityRegistry};
use crate::store::{RowQuery, Store, StoreError};

/// Row selection for `export_all`
pub type ExportQuery = RowQuery;

/// Label hints keyed by foreign key field name
pub type ForeignKeyHints = BTreeMap<String, String>;

/// Name of the hint field following a foreign key field
fn hint_field(field: &str) -> Option<String> {
    field
        .strip_suffix("_id")
        .filter(|stem| !stem.is_empty())
        .map(|stem| format!("{}_name", stem))
}

/// Placeholder shown in templates for a store-generated column
fn placeholder(column: &str) -> serde_json::Value {
    if AUTO_GENERATED_FIELDS.contains(&column) {
        serde_json::Value::String(chrono::Utc::now().to_rfc3339())
    } else {
        serde_json::Value::String("<generated>".to_string())
    }
}

/// Build the `data` mapping for one row
fn record_data(
    record: &Record,
    descriptor: &EntityDescriptor,
    hints: &ForeignKeyHints,
    template: bool,
) -> serde_json::Value {
    let mut data = serde_json::Map::new();

    for (field, value) in record.iter() {
        let value = if template && descriptor.is_auto_generated(field) {
            placeholder(field)
        } else {
            value.to_json()
        };
        data.insert(field.to_string(), value);

        if let (Some(label), Some(hint)) = (hints.get(field), hint_field(field)) {
            if !descriptor.has_column(&hint) {
                data.insert(hint, serde_json::Value::String(label.clone()));
            }
        }
    }

    if template {
        for column in descriptor.auto_generated_columns() {
            if !data.contains_key(&column.name) {
                data.insert(column.name.clone(), placeholder(&column.name));
            }
        }
    }

    serde_json::Value::Object(data)
}

fn meta(descriptor: &EntityDescriptor, template: bool) -> serde_json::Value {
    let mut meta = serde_json::Map::new();
    meta.insert("storageName".to_string(), json!(descriptor.storage_name));
    if template {
        let optional: Vec<&str> = descriptor
            .auto_generated_columns()
            .map(|c| c.name.as_str())
            .collect();
        meta.insert("optional".to_string(), json!(optional));
    }
    serde_json::Value::Object(meta)
}

fn unit(descriptor: &EntityDescriptor, template: bool, data: serde_json::Value) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("meta".to_string(), meta(descriptor, template));
    body.insert("data".to_string(), data);

    let mut document = serde_json::Map::new();
    document.insert(descriptor.name.clone(), serde_json::Value::Object(body));
    serde_json::Value::Object(document)
}

/// Serialize one row as a single-record unit.
///
/// In template mode auto-generated columns carry placeholder values and are
/// listed under `meta.optional`.
pub fn export_record(
    record: &Record,
    descriptor: &EntityDescriptor,
    hints: &ForeignKeyHints,
    template: bool,
) -> serde_json::Value {
    unit(descriptor, template, record_data(record, descriptor, hints, template))
}

/// Serialize several rows as a list-valued unit
pub fn export_records(
    rows: &[(Record, ForeignKeyHints)],
    descriptor: &EntityDescriptor,
    template: bool,
) -> serde_json::Value {
    let data = rows
        .iter()
        .map(|(record, hints)| record_data(record, descriptor, hints, template))
        .collect();
    unit(descriptor, template, serde_json::Value::Array(data))
}

/// Blank template listing every declared column
pub fn export_template(descriptor: &EntityDescriptor) -> serde_json::Value {
    let skeleton: Record = descriptor
        .columns
        .iter()
        .map(|c| (c.name.clone(), Value::Null))
        .collect();
    export_record(&skeleton, descriptor, &ForeignKeyHints::new(), true)
}

/// Reads rows from a store and serializes them
pub struct ExportEngine<'a> {
    registry: &'a dyn EntityRegistry,
    store: &'a dyn Store,
}

impl<'a> ExportEngine<'a> {
    pub fn new(registry: &'a dyn EntityRegistry, store: &'a dyn Store) -> Self {
        Self { registry, store }
    }

    /// Human-readable labels for the row's `_id` foreign keys.
    ///
    /// The label is the first natural-key field present on the referenced row.
    pub async fn foreign_key_hints(
        &self,
        descriptor: &EntityDescriptor,
        record: &Record,
    ) -> Result<ForeignKeyHints, StoreError> {
        let mut hints = ForeignKeyHints::new();

        for column in &descriptor.columns {
            let Some(target_storage) = &column.foreign_key else {
                continue;
            };
            if hint_field(&column.name).is_none() {
                continue;
            }
            let Some(value) = record.get_present(&column.name) else {
                continue;
            };
            let Some(target) = self.registry.describe_storage(target_storage) else {
                continue;
            };

            let rows = self
                .store
                .find_many(target_storage, &RowQuery::by_key(&target.primary_key, value))
                .await?;
            let label = rows.first().and_then(|row| {
                NATURAL_KEY_FIELDS
                    .iter()
                    .find_map(|field| row.get_present(field))
                    .map(|v| v.to_string())
            });

            if let Some(label) = label {
                hints.insert(column.name.clone(), label);
            }
        }

        Ok(hints)
    }

    /// Export the row with the given identifier, if it exists
    pub async fn export_one(
        &self,
        descriptor: &EntityDescriptor,
        id: &Value,
        template: bool,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let rows = self
            .store
            .find_many(
                &descriptor.storage_name,
                &RowQuery::by_key(&descriptor.primary_key, id),
            )
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let hints = self.foreign_key_hints(descriptor, &row).await?;
        Ok(Some(export_record(&row, descriptor, &hints, template)))
    }

    /// Export every row matching the query as one list-valued unit
    pub async fn export_all(
        &self,
        descriptor: &EntityDescriptor,
        query: &ExportQuery,
        template: bool,
    ) -> Result<serde_json::Value, StoreError> {
        let rows = self.store.find_many(&descriptor.storage_name, query).await?;
        log::info!("Exporting {} {} rows", rows.len(), descriptor.name);

        let mut annotated = Vec::with_capacity(rows.len());
        for row in rows {
            let hints = self.foreign_key_hints(descriptor, &row).await?;
            annotated.push((row, hints));
        }

        Ok(export_records(&annotated, descriptor, template))
    }
}

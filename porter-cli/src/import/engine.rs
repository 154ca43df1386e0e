//! Import engine: applies ordered units to a store, one transaction per record

use std::path::Path;

use uuid::Uuid;

use super::conflict::{Conflict, ConflictResolver, is_matchable};
use super::filter::{filter_record, rewrite_references};
use super::{IdRemap, ImportError, ImportMode};
use crate::record::{Record, Value};
use crate::registry::{EntityDescriptor, EntityRegistry, IdStrategy};
use crate::report::{RecordReport, RunReport, UnitReport};
use crate::resolver::{DependencyResolver, ImportUnit, Resolution};
use crate::store::{Store, StoreTransaction};

/// Per-run import switches
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Detect and report without committing anything
    pub dry_run: bool,
    /// Single natural-key field used instead of the default priority list
    pub match_field: Option<String>,
}

/// What happened (or would happen, in a dry run) to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Replaced,
    /// Update with nothing to change
    Skipped,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Replaced => "replaced",
            Action::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Successful result of applying one record
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub action: Action,
    /// Identifier of the row after the operation
    pub identifier: Value,
    /// Identifier the row had before (replace) or the supplied one (update),
    /// when it differs
    pub previous_identifier: Option<Value>,
    pub dry_run: bool,
}

/// How record writes reach the store during a run
pub enum RunScope {
    /// Each record commits (or, in a dry run, rolls back) its own transaction
    PerRecord,
    /// Dry run: one transaction for the whole run, never committed. Each
    /// record runs inside a savepoint so later records see earlier writes.
    DryRun(Box<dyn StoreTransaction>),
}

impl RunScope {
    /// Scope matching the options of a run
    pub async fn open(store: &dyn Store, options: &ImportOptions) -> Result<Self, ImportError> {
        if options.dry_run {
            Ok(RunScope::DryRun(store.begin().await?))
        } else {
            Ok(RunScope::PerRecord)
        }
    }

    /// Discard everything a dry run wrote
    pub async fn close(self) {
        if let RunScope::DryRun(tx) = self {
            if let Err(err) = tx.rollback().await {
                log::warn!("Rollback of dry run failed: {}", err);
            }
        }
    }
}

/// Outcome plus the remap to register once the transaction is settled
#[derive(Debug)]
struct Applied {
    outcome: Outcome,
    remap: Option<(Value, Value)>,
}

/// Applies import units to a store
pub struct ImportEngine<'a> {
    registry: &'a dyn EntityRegistry,
    store: &'a dyn Store,
}

impl<'a> ImportEngine<'a> {
    pub fn new(registry: &'a dyn EntityRegistry, store: &'a dyn Store) -> Self {
        Self { registry, store }
    }

    /// Resolve the order of everything under `source` and import it
    pub async fn run(&self, source: &Path, mode: ImportMode, options: &ImportOptions) -> RunReport {
        log::info!(
            "Importing {} in {} mode{}",
            source.display(),
            mode,
            if options.dry_run { " (dry run)" } else { "" }
        );
        let resolution = DependencyResolver::new(self.registry).resolve_import_order(source);
        self.run_resolution(resolution, mode, options).await
    }

    /// Apply already-resolved units strictly in order
    pub async fn run_resolution(
        &self,
        resolution: Resolution,
        mode: ImportMode,
        options: &ImportOptions,
    ) -> RunReport {
        let mut report = RunReport::new(mode, options.dry_run, resolution.report);

        if let Some(cycle) = &report.resolution.cycle {
            report.aborted = Some(ImportError::Resolution(cycle.clone()));
            return report;
        }

        let mut scope = match RunScope::open(self.store, options).await {
            Ok(scope) => scope,
            Err(err) => {
                report.aborted = Some(err);
                return report;
            }
        };

        let mut remap = IdRemap::new();
        for unit in &resolution.units {
            let unit_report = self
                .apply_unit(unit, mode, options, &mut remap, &mut scope)
                .await;
            report.units.push(unit_report);
        }
        report.remapped = remap.len();
        scope.close().await;

        report
    }

    /// Check the unit's shape and extract its records
    fn validate_unit<'u>(
        &self,
        unit: &'u ImportUnit,
    ) -> Result<(&'a EntityDescriptor, Vec<Record>), ImportError> {
        let locator = unit.locator_name();

        let descriptor = self.registry.describe(&unit.entity_name).ok_or_else(|| {
            ImportError::structural(&locator, format!("unknown entity type '{}'", unit.entity_name))
        })?;

        if !unit.body.is_object() {
            return Err(ImportError::structural(
                &locator,
                format!("'{}' must map to a 'meta' and 'data' section", unit.entity_name),
            ));
        }

        match unit.declared_storage_name() {
            None => {
                return Err(ImportError::structural(&locator, "missing meta.storageName"));
            }
            Some(declared) if declared != descriptor.storage_name => {
                return Err(ImportError::structural(
                    &locator,
                    format!(
                        "storage name '{}' does not match '{}' for {}",
                        declared, descriptor.storage_name, descriptor.name
                    ),
                ));
            }
            Some(_) => {}
        }

        let records = unit
            .records()
            .map_err(|reason| ImportError::structural(&locator, reason))?;

        Ok((descriptor, records))
    }

    /// Apply every record of a unit; record failures never stop the unit
    pub async fn apply_unit(
        &self,
        unit: &ImportUnit,
        mode: ImportMode,
        options: &ImportOptions,
        remap: &mut IdRemap,
        scope: &mut RunScope,
    ) -> UnitReport {
        let mut report = UnitReport::new(unit.locator_name(), unit.entity_name.clone());

        let (descriptor, records) = match self.validate_unit(unit) {
            Ok(validated) => validated,
            Err(err) => {
                log::warn!("{}", err);
                report.error = Some(err);
                return report;
            }
        };

        if let Some(field) = options.match_field.as_deref() {
            if !is_matchable(descriptor, field) {
                log::warn!(
                    "{} has no column '{}' to match on; using the default natural keys",
                    descriptor.name,
                    field
                );
            }
        }

        log::info!(
            "Applying {} {} records from {}",
            records.len(),
            descriptor.name,
            report.locator
        );

        for (index, raw) in records.iter().enumerate() {
            let identifier = raw
                .get_present(&descriptor.primary_key)
                .map(|v| v.to_string());

            let result = self
                .apply_record(descriptor, raw, mode, options, remap, scope)
                .await;
            match &result {
                Ok(outcome) => log::debug!(
                    "{}[{}] {} -> {}",
                    descriptor.name,
                    index,
                    outcome.action,
                    outcome.identifier
                ),
                Err(err) => log::warn!("{}[{}] failed: {}", descriptor.name, index, err),
            }

            report.records.push(RecordReport {
                index,
                identifier,
                result,
            });
        }

        report
    }

    /// Apply one record in its own transaction, or its own savepoint of
    /// the run's dry-run transaction.
    ///
    /// Everything the record wrote is undone on error. A remap produced by
    /// the record is registered only once its writes have been settled.
    pub async fn apply_record(
        &self,
        descriptor: &EntityDescriptor,
        raw: &Record,
        mode: ImportMode,
        options: &ImportOptions,
        remap: &mut IdRemap,
        scope: &mut RunScope,
    ) -> Result<Outcome, ImportError> {
        let applied = match scope {
            RunScope::PerRecord => {
                let mut tx = self.store.begin().await?;
                let result =
                    apply_in_transaction(descriptor, raw, mode, options, remap, tx.as_mut()).await;
                match result {
                    Ok(applied) if options.dry_run => {
                        tx.rollback().await?;
                        applied
                    }
                    Ok(applied) => {
                        tx.commit().await?;
                        applied
                    }
                    Err(err) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            log::warn!("Rollback failed: {}", rollback_err);
                        }
                        return Err(err);
                    }
                }
            }
            RunScope::DryRun(tx) => {
                tx.savepoint().await?;
                let result =
                    apply_in_transaction(descriptor, raw, mode, options, remap, tx.as_mut()).await;
                match result {
                    Ok(applied) => {
                        tx.release_savepoint().await?;
                        applied
                    }
                    Err(err) => {
                        if let Err(rollback_err) = tx.rollback_to_savepoint().await {
                            log::warn!("Rollback failed: {}", rollback_err);
                        }
                        return Err(err);
                    }
                }
            }
        };

        if let Some((old, new)) = &applied.remap {
            if remap.register(&descriptor.storage_name, old, new) {
                log::info!("Remapped {} {} -> {}", descriptor.name, old, new);
            }
        }

        Ok(applied.outcome)
    }
}

/// Identifier of a stored row
fn row_identifier(descriptor: &EntityDescriptor, row: &Record) -> Result<Value, ImportError> {
    row.get_present(&descriptor.primary_key)
        .cloned()
        .ok_or_else(|| ImportError::NotFound {
            entity: descriptor.name.clone(),
            reason: format!("matched row has no '{}' value", descriptor.primary_key),
        })
}

fn conflict_error(descriptor: &EntityDescriptor, reason: &str, rows: &[&Record]) -> ImportError {
    let mut matches: Vec<String> = Vec::new();
    for row in rows {
        let id = row
            .get(&descriptor.primary_key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(no identifier)".to_string());
        if !matches.contains(&id) {
            matches.push(id);
        }
    }
    ImportError::Conflict {
        entity: descriptor.name.clone(),
        reason: reason.to_string(),
        matches,
    }
}

fn ambiguous(descriptor: &EntityDescriptor, rows: &[Record]) -> ImportError {
    let rows: Vec<&Record> = rows.iter().collect();
    conflict_error(
        descriptor,
        "natural keys match several different rows",
        &rows,
    )
}

/// Insert `record` as a new row, assigning an identifier when needed
async fn insert_new(
    descriptor: &EntityDescriptor,
    record: &Record,
    tx: &mut dyn StoreTransaction,
) -> Result<Value, ImportError> {
    let primary_key = &descriptor.primary_key;
    let mut row = record.clone();

    if row.get_present(primary_key).is_none() {
        match descriptor.id_strategy {
            IdStrategy::Uuid => row.insert_first(primary_key.as_str(), Value::Guid(Uuid::new_v4())),
            IdStrategy::Store => {
                row.remove(primary_key);
            }
        }
    }

    Ok(tx.insert(&descriptor.storage_name, primary_key, &row).await?)
}

/// Filter, rewrite, detect and dispatch. Writes always go to `tx`; the
/// caller decides whether they are kept. No remap is written here.
async fn apply_in_transaction(
    descriptor: &EntityDescriptor,
    raw: &Record,
    mode: ImportMode,
    options: &ImportOptions,
    remap: &IdRemap,
    tx: &mut dyn StoreTransaction,
) -> Result<Applied, ImportError> {
    let storage = &descriptor.storage_name;
    let primary_key = &descriptor.primary_key;

    let mut record = filter_record(descriptor, raw);
    rewrite_references(descriptor, &mut record, remap);

    let resolver = ConflictResolver::new(descriptor, options.match_field.as_deref());
    let conflicts = resolver.find_conflicts(&record, tx).await?;
    let conflict = conflicts.classify(primary_key);

    let supplied = record.get_present(primary_key).cloned();

    match mode {
        ImportMode::Create => match conflict {
            Conflict::NoMatch => {
                let identifier = insert_new(descriptor, &record, tx).await?;
                Ok(Applied {
                    outcome: Outcome {
                        action: Action::Created,
                        identifier,
                        previous_identifier: None,
                        dry_run: options.dry_run,
                    },
                    remap: None,
                })
            }
            Conflict::Ambiguous(rows) => Err(ambiguous(descriptor, &rows)),
            Conflict::Exact(row) | Conflict::NaturalKeyOnly(row) => {
                Err(conflict_error(descriptor, "record already exists", &[&row]))
            }
            Conflict::Split {
                by_identifier,
                by_natural_key,
            } => Err(conflict_error(
                descriptor,
                "record already exists",
                &[&by_identifier, &by_natural_key],
            )),
        },

        ImportMode::Update => {
            let row = match conflict {
                Conflict::Exact(row) | Conflict::NaturalKeyOnly(row) => row,
                Conflict::Split { by_identifier, .. } => by_identifier,
                Conflict::Ambiguous(rows) => return Err(ambiguous(descriptor, &rows)),
                Conflict::NoMatch => {
                    return Err(ImportError::NotFound {
                        entity: descriptor.name.clone(),
                        reason: match &supplied {
                            Some(id) => format!("no row with identifier {} or a matching natural key", id),
                            None => "no row matches the record's natural keys".to_string(),
                        },
                    });
                }
            };

            let actual = row_identifier(descriptor, &row)?;

            let changes: Record = record
                .iter()
                .filter(|(field, _)| *field != primary_key.as_str())
                .filter(|(field, value)| !row.get(field).is_some_and(|stored| stored.same_as(value)))
                .map(|(field, value)| (field.to_string(), value.clone()))
                .collect();

            let action = if changes.is_empty() {
                Action::Skipped
            } else {
                tx.update(storage, primary_key, &actual, &changes).await?;
                Action::Updated
            };

            let remapped = supplied
                .filter(|id| !id.same_as(&actual))
                .map(|id| (id, actual.clone()));

            Ok(Applied {
                outcome: Outcome {
                    action,
                    identifier: actual,
                    previous_identifier: remapped.as_ref().map(|(old, _)| old.clone()),
                    dry_run: options.dry_run,
                },
                remap: remapped,
            })
        }

        ImportMode::Replace => {
            let row = match conflict {
                Conflict::NoMatch => {
                    let identifier = insert_new(descriptor, &record, tx).await?;
                    return Ok(Applied {
                        outcome: Outcome {
                            action: Action::Created,
                            identifier,
                            previous_identifier: None,
                            dry_run: options.dry_run,
                        },
                        remap: None,
                    });
                }
                Conflict::NaturalKeyOnly(row) | Conflict::Exact(row) => row,
                Conflict::Ambiguous(rows) => return Err(ambiguous(descriptor, &rows)),
                Conflict::Split {
                    by_identifier,
                    by_natural_key,
                } => {
                    return Err(conflict_error(
                        descriptor,
                        "the supplied identifier belongs to a different row than the natural-key match",
                        &[&by_identifier, &by_natural_key],
                    ));
                }
            };

            let deleted = row_identifier(descriptor, &row)?;
            tx.delete(storage, primary_key, &deleted).await?;

            let identifier = insert_new(descriptor, &record, tx).await?;
            let remapped = (!deleted.same_as(&identifier)).then(|| (deleted.clone(), identifier.clone()));

            Ok(Applied {
                outcome: Outcome {
                    action: Action::Replaced,
                    identifier,
                    previous_identifier: Some(deleted),
                    dry_run: options.dry_run,
                },
                remap: remapped,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ColumnDescriptor, StaticRegistry};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn registry() -> StaticRegistry {
        StaticRegistry::new(vec![
            EntityDescriptor::new("Widget", "widgets")
                .with_column(ColumnDescriptor::new("name").required().unique())
                .with_column(ColumnDescriptor::new("price"))
                .with_column(ColumnDescriptor::new("created_at").auto_generated()),
            EntityDescriptor::new("LineItem", "line_items")
                .with_column(ColumnDescriptor::new("widget_id").required().references("widgets"))
                .with_column(ColumnDescriptor::new("qty"))
                .with_dependency("Widget"),
            EntityDescriptor::new("Counter", "counters")
                .with_id_strategy(IdStrategy::Store)
                .with_column(ColumnDescriptor::new("label").unique()),
        ])
        .unwrap()
    }

    fn unit(locator: &str, entity: &str, storage: &str, data: serde_json::Value) -> ImportUnit {
        let mut document = serde_json::Map::new();
        document.insert(
            entity.to_string(),
            json!({"meta": {"storageName": storage}, "data": data}),
        );
        ImportUnit::from_document(locator, serde_json::Value::Object(document)).unwrap()
    }

    fn write_unit(dir: &Path, name: &str, entity: &str, storage: &str, data: serde_json::Value) {
        let mut document = serde_json::Map::new();
        document.insert(
            entity.to_string(),
            json!({"meta": {"storageName": storage}, "data": data}),
        );
        let text = serde_yaml::to_string(&serde_json::Value::Object(document)).unwrap();
        std::fs::write(dir.join(name), text).unwrap();
    }

    fn opts(dry_run: bool) -> ImportOptions {
        ImportOptions {
            dry_run,
            match_field: None,
        }
    }

    async fn apply(
        engine: &ImportEngine<'_>,
        unit: &ImportUnit,
        mode: ImportMode,
        remap: &mut IdRemap,
    ) -> UnitReport {
        engine
            .apply_unit(unit, mode, &opts(false), remap, &mut RunScope::PerRecord)
            .await
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);

        let dir = tempfile::tempdir().unwrap();
        write_unit(
            dir.path(),
            "widgets.yaml",
            "Widget",
            "widgets",
            json!([{"name": "Gadget", "price": 10}, {"name": "Gizmo", "price": 5}]),
        );

        let first = engine.run(dir.path(), ImportMode::Create, &opts(false)).await;
        assert!(first.is_success());
        assert_eq!(first.summary().created, 2);

        let second = engine.run(dir.path(), ImportMode::Create, &opts(false)).await;
        assert!(!second.is_success());
        assert_eq!(second.exit_code(), 1);
        let summary = second.summary();
        assert_eq!(summary.failed, 2);
        for record in &second.units[0].records {
            assert!(matches!(record.result, Err(ImportError::Conflict { .. })));
        }

        assert_eq!(store.rows("widgets").len(), 2);
    }

    #[tokio::test]
    async fn test_update_converges() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);
        let id = Uuid::new_v4().to_string();
        let mut remap = IdRemap::new();

        let first = unit("a.yaml", "Widget", "widgets", json!({"id": id, "name": "Gadget", "price": 10}));
        let report = apply(&engine, &first, ImportMode::Create, &mut remap).await;
        assert!(report.is_success());

        let second = unit("b.yaml", "Widget", "widgets", json!({"id": id, "name": "Gadget", "price": 12}));
        let report = apply(&engine, &second, ImportMode::Update, &mut remap).await;
        assert!(report.is_success());
        let outcome = report.records[0].result.as_ref().unwrap();
        assert_eq!(outcome.action, Action::Updated);

        let rows = store.rows("widgets");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("id").unwrap().same_as(&Value::from(id.as_str())));
        assert_eq!(rows[0].get("price"), Some(&Value::Int(12)));

        // identical data is a no-op
        let report = apply(&engine, &second, ImportMode::Update, &mut remap).await;
        assert_eq!(report.records[0].result.as_ref().unwrap().action, Action::Skipped);
    }

    #[tokio::test]
    async fn test_update_by_natural_key_registers_remap() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        store
            .seed("widgets", vec![record! { "id" => "w-actual", "name" => "Gadget", "price" => 1 }])
            .await
            .unwrap();
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        let widgets = unit("w.yaml", "Widget", "widgets", json!({"id": "w-supplied", "name": "Gadget", "price": 2}));
        let report = apply(&engine, &widgets, ImportMode::Update, &mut remap).await;
        let outcome = report.records[0].result.as_ref().unwrap();
        assert_eq!(outcome.identifier, Value::from("w-actual"));
        assert_eq!(outcome.previous_identifier, Some(Value::from("w-supplied")));
        assert_eq!(remap.resolve("widgets", &Value::from("w-supplied")), Some(&Value::from("w-actual")));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        let widgets = unit("w.yaml", "Widget", "widgets", json!({"name": "Nothing", "price": 2}));
        let report = apply(&engine, &widgets, ImportMode::Update, &mut remap).await;
        assert!(matches!(report.records[0].result, Err(ImportError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_replace_propagates_remap() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        store
            .seed("widgets", vec![record! { "id" => "OLD", "name" => "Gadget", "price" => 10 }])
            .await
            .unwrap();
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        let widgets = unit("w.yaml", "Widget", "widgets", json!({"name": "Gadget", "price": 11}));
        let report = apply(&engine, &widgets, ImportMode::Replace, &mut remap).await;
        let outcome = report.records[0].result.as_ref().unwrap().clone();
        assert_eq!(outcome.action, Action::Replaced);
        assert_eq!(outcome.previous_identifier, Some(Value::from("OLD")));

        let items = unit("l.yaml", "LineItem", "line_items", json!({"widget_id": "OLD", "qty": 3}));
        let report = apply(&engine, &items, ImportMode::Create, &mut remap).await;
        assert!(report.is_success());

        let widgets = store.rows("widgets");
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].get("name"), Some(&Value::from("Gadget")));
        let new_id = widgets[0].get("id").unwrap();
        assert!(!new_id.same_as(&Value::from("OLD")));
        assert!(new_id.same_as(&outcome.identifier));

        let items = store.rows("line_items");
        assert_eq!(items.len(), 1);
        assert!(items[0].get("widget_id").unwrap().same_as(new_id));
    }

    #[tokio::test]
    async fn test_replace_run_orders_parents_first() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        store
            .seed("widgets", vec![record! { "id" => "OLD", "name" => "Gadget" }])
            .await
            .unwrap();
        let engine = ImportEngine::new(&reg, &store);

        // the child file sorts first by name; resolution must still put Widget first
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "a-items.yaml", "LineItem", "line_items", json!({"widget_id": "OLD", "qty": 3}));
        write_unit(dir.path(), "b-widgets.yaml", "Widget", "widgets", json!({"name": "Gadget"}));

        let report = engine.run(dir.path(), ImportMode::Replace, &opts(false)).await;
        assert!(report.is_success(), "{:?}", report.failures());
        assert_eq!(report.remapped, 1);

        let new_id = store.rows("widgets")[0].get("id").cloned().unwrap();
        let items = store.rows("line_items");
        assert!(items[0].get("widget_id").unwrap().same_as(&new_id));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        store
            .seed("widgets", vec![record! { "id" => "OLD", "name" => "Gadget", "price" => 10 }])
            .await
            .unwrap();
        let before = store.rows("widgets");
        let engine = ImportEngine::new(&reg, &store);

        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "w.yaml", "Widget", "widgets", json!([{"name": "Gadget", "price": 99}, {"name": "Fresh"}]));
        write_unit(dir.path(), "l.yaml", "LineItem", "line_items", json!({"widget_id": "OLD", "qty": 1}));

        for mode in [ImportMode::Create, ImportMode::Update, ImportMode::Replace] {
            let report = engine.run(dir.path(), mode, &opts(true)).await;
            assert!(report.dry_run);
            assert!(!report.units.is_empty());
            assert_eq!(store.rows("widgets"), before);
            assert!(store.rows("line_items").is_empty());
        }

        let report = engine.run(dir.path(), ImportMode::Replace, &opts(true)).await;
        let actions: Vec<_> = report.units[0]
            .records
            .iter()
            .map(|r| r.result.as_ref().unwrap().action)
            .collect();
        assert_eq!(actions, vec![Action::Replaced, Action::Created]);
        assert!(report.units[0].records.iter().all(|r| r.result.as_ref().unwrap().dry_run));
    }

    #[tokio::test]
    async fn test_ambiguous_matches_conflict_in_every_mode() {
        let reg = StaticRegistry::new(vec![EntityDescriptor::new("Widget", "widgets")
            .with_column(ColumnDescriptor::new("name").unique())
            .with_column(ColumnDescriptor::new("sku").unique())])
        .unwrap();
        let store = MemoryStore::new(&reg);
        store
            .seed(
                "widgets",
                vec![
                    record! { "id" => 1, "name" => "Gadget", "sku" => "A" },
                    record! { "id" => 2, "name" => "Gizmo", "sku" => "B" },
                ],
            )
            .await
            .unwrap();
        let engine = ImportEngine::new(&reg, &store);
        let widgets = unit("w.yaml", "Widget", "widgets", json!({"name": "Gadget", "sku": "B"}));

        for mode in [ImportMode::Create, ImportMode::Update, ImportMode::Replace] {
            let mut remap = IdRemap::new();
            let report = apply(&engine, &widgets, mode, &mut remap).await;
            match &report.records[0].result {
                Err(ImportError::Conflict { matches, .. }) => assert_eq!(matches, &vec!["1", "2"]),
                other => panic!("expected conflict, got {:?}", other),
            }
        }
        assert_eq!(store.rows("widgets").len(), 2);
    }

    #[tokio::test]
    async fn test_structural_failures_skip_unit() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        let wrong_storage = unit("w.yaml", "Widget", "gadgets", json!({"name": "x"}));
        let report = apply(&engine, &wrong_storage, ImportMode::Create, &mut remap).await;
        assert!(matches!(report.error, Some(ImportError::Structural { .. })));
        assert!(report.records.is_empty());

        let unknown = unit("g.yaml", "Gizmo", "gizmos", json!({"name": "x"}));
        let report = apply(&engine, &unknown, ImportMode::Create, &mut remap).await;
        assert!(matches!(report.error, Some(ImportError::Structural { .. })));

        assert!(store.rows("widgets").is_empty());
    }

    #[tokio::test]
    async fn test_persistence_error_rolls_back_only_that_record() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        // second record lacks the required name and carries an unknown column
        let widgets = unit(
            "w.yaml",
            "Widget",
            "widgets",
            json!([{"name": "Good", "created_at": "2024-01-01T00:00:00Z"}, {"price": 1}, {"name": "Bad", "colour": "red"}]),
        );
        let report = apply(&engine, &widgets, ImportMode::Create, &mut remap).await;

        assert!(report.records[0].result.is_ok());
        assert!(matches!(report.records[1].result, Err(ImportError::Persistence(_))));
        assert!(matches!(report.records[2].result, Err(ImportError::Persistence(_))));
        let rows = store.rows("widgets");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains("created_at"));
    }

    #[tokio::test]
    async fn test_store_assigned_identifiers() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        let counters = unit("c.yaml", "Counter", "counters", json!([{"label": "a"}, {"label": "b"}]));
        let report = apply(&engine, &counters, ImportMode::Create, &mut remap).await;
        let ids: Vec<_> = report
            .records
            .iter()
            .map(|r| r.result.as_ref().unwrap().identifier.clone())
            .collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2)]);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_mutation() {
        let reg = StaticRegistry::new(vec![
            EntityDescriptor::new("Chicken", "chickens").with_dependency("Egg"),
            EntityDescriptor::new("Egg", "eggs").with_dependency("Chicken"),
        ])
        .unwrap();
        let store = MemoryStore::new(&reg);
        let engine = ImportEngine::new(&reg, &store);

        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "c.yaml", "Chicken", "chickens", json!({"id": "c1"}));
        write_unit(dir.path(), "e.yaml", "Egg", "eggs", json!({"id": "e1"}));

        let report = engine.run(dir.path(), ImportMode::Create, &opts(false)).await;
        assert!(matches!(report.aborted, Some(ImportError::Resolution(_))));
        assert!(report.units.is_empty());
        assert_eq!(report.exit_code(), 1);
        assert!(store.rows("chickens").is_empty());
    }

    #[tokio::test]
    async fn test_remap_only_touches_references_to_the_replaced_table() {
        let reg = StaticRegistry::new(vec![
            EntityDescriptor::new("Widget", "widgets")
                .with_id_strategy(IdStrategy::Store)
                .with_column(ColumnDescriptor::new("name").unique()),
            EntityDescriptor::new("Order", "orders").with_id_strategy(IdStrategy::Store),
            EntityDescriptor::new("LineItem", "line_items")
                .with_column(ColumnDescriptor::new("order_id").references("orders"))
                .with_column(ColumnDescriptor::new("widget_id").references("widgets"))
                .with_column(ColumnDescriptor::new("spare_widget_id").references("widgets"))
                .with_dependency("Order")
                .with_dependency("Widget"),
        ])
        .unwrap();
        let store = MemoryStore::new(&reg);
        store
            .seed(
                "widgets",
                vec![
                    record! { "id" => 1, "name" => "Gadget" },
                    record! { "id" => 2, "name" => "Gizmo" },
                ],
            )
            .await
            .unwrap();
        store.seed("orders", vec![record! { "id" => 1 }]).await.unwrap();
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        let widgets = unit("w.yaml", "Widget", "widgets", json!({"name": "Gadget"}));
        let report = apply(&engine, &widgets, ImportMode::Replace, &mut remap).await;
        let outcome = report.records[0].result.as_ref().unwrap();
        assert_eq!(outcome.previous_identifier, Some(Value::Int(1)));
        assert_eq!(outcome.identifier, Value::Int(3));

        let items = unit(
            "l.yaml",
            "LineItem",
            "line_items",
            json!({"order_id": 1, "widget_id": 1, "spare_widget_id": 2}),
        );
        let report = apply(&engine, &items, ImportMode::Create, &mut remap).await;
        assert!(report.is_success(), "{:?}", report.records);

        let rows = store.rows("line_items");
        assert_eq!(rows[0].get("order_id"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("widget_id"), Some(&Value::Int(3)));
        assert_eq!(rows[0].get("spare_widget_id"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_dry_run_reports_what_a_real_run_does() {
        let reg = registry();
        let dir = tempfile::tempdir().unwrap();
        write_unit(
            dir.path(),
            "w.yaml",
            "Widget",
            "widgets",
            json!([{"name": "Gadget"}, {"name": "Gadget"}, {"name": "Gizmo"}]),
        );
        write_unit(dir.path(), "c.yaml", "Counter", "counters", json!([{"label": "a"}, {"label": "b"}]));

        let statuses = |report: &RunReport| -> Vec<String> {
            report
                .units
                .iter()
                .flat_map(|u| u.records.iter())
                .map(|r| r.status().to_string())
                .collect()
        };

        for mode in [ImportMode::Create, ImportMode::Replace] {
            let store = MemoryStore::new(&reg);
            let engine = ImportEngine::new(&reg, &store);

            let dry = engine.run(dir.path(), mode, &opts(true)).await;
            assert!(store.rows("widgets").is_empty());
            assert!(store.rows("counters").is_empty());

            let real = engine.run(dir.path(), mode, &opts(false)).await;
            assert_eq!(statuses(&dry), statuses(&real), "{} mode", mode);
            assert_eq!(dry.status(), real.status());

            // store-assigned identifiers are the ones the real run gets
            let ids = |report: &RunReport| -> Vec<Value> {
                report.units[0]
                    .records
                    .iter()
                    .map(|r| r.result.as_ref().unwrap().identifier.clone())
                    .collect()
            };
            assert_eq!(ids(&dry), ids(&real));
        }
    }

    #[tokio::test]
    async fn test_failed_reinsert_keeps_replaced_row() {
        let reg = registry();
        let store = MemoryStore::new(&reg);
        store
            .seed("widgets", vec![record! { "id" => "OLD", "name" => "Gadget", "price" => 10 }])
            .await
            .unwrap();
        let before = store.rows("widgets");
        let engine = ImportEngine::new(&reg, &store);
        let mut remap = IdRemap::new();

        // unknown column, then a missing required name, both after the delete
        let widgets = unit(
            "w.yaml",
            "Widget",
            "widgets",
            json!([{"name": "Gadget", "colour": "red"}, {"id": "OLD", "price": 11}]),
        );
        let report = apply(&engine, &widgets, ImportMode::Replace, &mut remap).await;

        for record in &report.records {
            assert!(matches!(record.result, Err(ImportError::Persistence(_))), "{:?}", record.result);
        }
        assert_eq!(store.rows("widgets"), before);
        assert!(remap.is_empty());
    }
}

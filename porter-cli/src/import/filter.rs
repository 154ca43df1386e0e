//! Record clean-up applied before conflict detection

use crate::record::Record;
use crate::registry::EntityDescriptor;

use super::IdRemap;

/// Whether `field` is an export-only label hint (`X_name` next to `X_id`)
fn is_reference_hint(descriptor: &EntityDescriptor, record: &Record, field: &str) -> bool {
    if descriptor.has_column(field) {
        return false;
    }
    field
        .strip_suffix("_name")
        .is_some_and(|stem| !stem.is_empty() && record.contains(&format!("{}_id", stem)))
}

/// Drop auto-generated fields and reference hints, and rename aliases to
/// their column names. Field order is preserved.
pub fn filter_record(descriptor: &EntityDescriptor, raw: &Record) -> Record {
    let mut filtered = Record::new();

    for (field, value) in raw.iter() {
        if descriptor.is_auto_generated(field) {
            log::debug!("Dropping auto-generated field {}.{}", descriptor.name, field);
            continue;
        }
        if is_reference_hint(descriptor, raw, field) {
            continue;
        }

        match descriptor.resolve_alias(field) {
            Some(column) => filtered.insert(column, value.clone()),
            None => filtered.insert(field, value.clone()),
        }
    }

    filtered
}

/// Rewrite foreign-key shaped fields whose value was remapped earlier in
/// the run. Declared foreign keys only look at remaps of their target
/// table. Returns the names of the rewritten fields.
pub fn rewrite_references(
    descriptor: &EntityDescriptor,
    record: &mut Record,
    remap: &IdRemap,
) -> Vec<String> {
    if remap.is_empty() {
        return Vec::new();
    }

    let rewrites: Vec<_> = record
        .iter()
        .filter(|(field, _)| descriptor.is_foreign_key_shaped(field))
        .filter_map(|(field, value)| {
            let target = descriptor
                .column(field)
                .and_then(|c| c.foreign_key.as_deref());
            let new = match target {
                Some(storage) => remap.resolve(storage, value),
                None => remap.resolve_any(value),
            };
            new.map(|new| (field.to_string(), new.clone()))
        })
        .collect();

    for (field, new) in &rewrites {
        log::debug!("Remapped {}.{} -> {}", descriptor.name, field, new);
        record.insert(field.as_str(), new.clone());
    }

    rewrites.into_iter().map(|(field, _)| field).collect()
}

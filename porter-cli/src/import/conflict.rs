//! Conflict detection: find existing rows a record would collide with

use crate::record::{Record, Value};
use crate::registry::EntityDescriptor;
use crate::store::{StoreError, StoreTransaction};

/// Conventionally unique field names, in lookup priority order
pub const NATURAL_KEY_FIELDS: &[&str] = &["name", "email", "username", "slug", "code", "identifier"];

/// Raw lookup results for one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictSet {
    /// Row with the record's own identifier
    pub by_identifier: Option<Record>,
    /// Distinct rows matched through natural keys and unique constraints
    pub by_natural_key: Vec<Record>,
}

/// What the lookups found, as a closed set of cases
#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    NoMatch,
    /// The identifier matched, and no other row matched a natural key
    Exact(Record),
    /// No identifier match; exactly one natural-key match
    NaturalKeyOnly(Record),
    /// The identifier and the natural key point at different rows
    Split {
        by_identifier: Record,
        by_natural_key: Record,
    },
    /// Several distinct rows matched natural keys
    Ambiguous(Vec<Record>),
}

fn same_row(a: &Record, b: &Record, primary_key: &str) -> bool {
    match (a.get_present(primary_key), b.get_present(primary_key)) {
        (Some(a), Some(b)) => a.same_as(b),
        _ => a == b,
    }
}

impl ConflictSet {
    pub fn classify(self, primary_key: &str) -> Conflict {
        let ConflictSet {
            by_identifier,
            mut by_natural_key,
        } = self;

        if by_natural_key.len() > 1 {
            return Conflict::Ambiguous(by_natural_key);
        }

        match (by_identifier, by_natural_key.pop()) {
            (None, None) => Conflict::NoMatch,
            (Some(row), None) => Conflict::Exact(row),
            (None, Some(row)) => Conflict::NaturalKeyOnly(row),
            (Some(id_row), Some(key_row)) => {
                if same_row(&id_row, &key_row, primary_key) {
                    Conflict::Exact(id_row)
                } else {
                    Conflict::Split {
                        by_identifier: id_row,
                        by_natural_key: key_row,
                    }
                }
            }
        }
    }
}

/// Whether `field` can serve as the match field for an entity
pub fn is_matchable(descriptor: &EntityDescriptor, field: &str) -> bool {
    field != descriptor.primary_key && descriptor.column(field).is_some()
}

/// Looks up existing rows for records of one entity
pub struct ConflictResolver<'a> {
    descriptor: &'a EntityDescriptor,
    match_field: Option<&'a str>,
}

impl<'a> ConflictResolver<'a> {
    /// `match_field` replaces the natural-key priority list when it names
    /// a column of the entity; otherwise the priority list applies
    pub fn new(descriptor: &'a EntityDescriptor, match_field: Option<&'a str>) -> Self {
        Self {
            descriptor,
            match_field: match_field.filter(|field| is_matchable(descriptor, field)),
        }
    }

    /// Column sets to look the record up by, in order.
    ///
    /// The first present natural-key field comes first, followed by every
    /// unique constraint whose columns are all present.
    pub fn natural_key_lookups(&self, record: &Record) -> Vec<Vec<(String, Value)>> {
        let mut lookups: Vec<Vec<(String, Value)>> = Vec::new();

        let candidates: Vec<&str> = match self.match_field {
            Some(field) => vec![field],
            None => NATURAL_KEY_FIELDS.to_vec(),
        };

        let natural = candidates.into_iter().find_map(|field| {
            if !is_matchable(self.descriptor, field) {
                return None;
            }
            record
                .get_present(field)
                .map(|value| vec![(field.to_string(), value.clone())])
        });
        lookups.extend(natural);

        for constraint in self.descriptor.unique_constraints() {
            let criteria: Option<Vec<(String, Value)>> = constraint
                .iter()
                .map(|column| {
                    record
                        .get_present(column)
                        .map(|value| (column.clone(), value.clone()))
                })
                .collect();

            if let Some(criteria) = criteria {
                if !lookups.contains(&criteria) {
                    lookups.push(criteria);
                }
            }
        }

        lookups
    }

    /// Run the identifier and natural-key lookups. Read-only.
    pub async fn find_conflicts(
        &self,
        record: &Record,
        tx: &mut dyn StoreTransaction,
    ) -> Result<ConflictSet, StoreError> {
        let storage = &self.descriptor.storage_name;
        let primary_key = &self.descriptor.primary_key;
        let mut conflicts = ConflictSet::default();

        if let Some(id) = record.get_present(primary_key) {
            let criteria = [(primary_key.clone(), id.clone())];
            conflicts.by_identifier = tx.find_one(storage, &criteria).await?;
        }

        for criteria in self.natural_key_lookups(record) {
            let Some(row) = tx.find_one(storage, &criteria).await? else {
                continue;
            };
            if !conflicts
                .by_natural_key
                .iter()
                .any(|existing| same_row(existing, &row, primary_key))
            {
                conflicts.by_natural_key.push(row);
            }
        }

        Ok(conflicts)
    }
}

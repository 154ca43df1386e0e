use std::collections::BTreeMap;

use crate::record::Value;

/// Run-scoped identifier substitutions, per storage name.
///
/// Written after a replace or an identifier-changing update, read before
/// every insert. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct IdRemap {
    entries: BTreeMap<(String, String), Value>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `old -> new` for rows of `storage`.
    ///
    /// Entries of the same storage that pointed at `old` are redirected to
    /// `new`, so a chain of replacements always resolves to the latest
    /// identifier. Returns false when nothing was recorded.
    pub fn register(&mut self, storage: &str, old: &Value, new: &Value) -> bool {
        let (Some(old_key), Some(new_key)) = (old.identity_key(), new.identity_key()) else {
            return false;
        };
        if old_key == new_key {
            return false;
        }

        for ((entry_storage, _), target) in self.entries.iter_mut() {
            if entry_storage == storage && target.identity_key().as_deref() == Some(old_key.as_str())
            {
                *target = new.clone();
            }
        }
        self.entries
            .retain(|(_, key), target| target.identity_key().as_deref() != Some(key.as_str()));

        self.entries.insert((storage.to_string(), old_key), new.clone());
        true
    }

    /// Replacement for an identifier of a row in `storage`
    pub fn resolve(&self, storage: &str, value: &Value) -> Option<&Value> {
        let key = value.identity_key()?;
        self.entries.get(&(storage.to_string(), key))
    }

    /// Replacement for an identifier whose table is not known.
    ///
    /// Only answers when exactly one storage has remapped that identifier.
    pub fn resolve_any(&self, value: &Value) -> Option<&Value> {
        let key = value.identity_key()?;
        let mut found = self
            .entries
            .iter()
            .filter(|((_, entry_key), _)| *entry_key == key)
            .map(|(_, target)| target);
        match (found.next(), found.next()) {
            (Some(target), None) => Some(target),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

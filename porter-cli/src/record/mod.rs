//! Records: ordered field maps moved between unit files and stores

mod value;

pub use value::*;

/// One instance of an entity: an ordered mapping of field name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a decoded JSON/YAML value.
    ///
    /// Returns `None` when the value is not a map.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let obj = json.as_object()?;
        Some(
            obj.iter()
                .map(|(name, value)| (name.clone(), Value::from_json(value)))
                .collect(),
        )
    }

    /// Convert to a JSON object, preserving field order
    pub fn to_json(&self) -> serde_json::Value {
        let obj: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(obj)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Get a field only if it holds a non-null value
    pub fn get_present(&self, field: &str) -> Option<&Value> {
        self.get(field).filter(|v| !v.is_null())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Set a field, replacing in place if it already exists
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Set a field at the front of the record (used for assigned identifiers)
    pub fn insert_first(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        self.remove(&field);
        self.fields.insert(0, (field, value.into()));
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field-by-field comparison ignoring the listed fields
    #[cfg(test)]
    pub fn same_fields_as(&self, other: &Record, ignore: &[&str]) -> bool {
        let relevant = |r: &Record| {
            r.iter()
                .filter(|(name, _)| !ignore.contains(name))
                .count()
        };
        relevant(self) == relevant(other)
            && self
                .iter()
                .filter(|(name, _)| !ignore.contains(name))
                .all(|(name, value)| other.get(name).is_some_and(|o| o.same_as(value)))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a str, &'a Value);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a Value)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Build a record from `field => value` pairs
#[macro_export]
macro_rules! record {
    ($($field:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut record = $crate::record::Record::new();
        $(record.insert($field, $value);)*
        record
    }};
}

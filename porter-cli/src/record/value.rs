//! Field value representation for imported and stored records

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A single field value, as decoded from a unit file or read back from a store
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null/empty value
    #[default]
    Null,
    /// String value
    String(String),
    /// Whole number (integer)
    Int(i64),
    /// Floating point
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Date and time (normalized to UTC)
    DateTime(DateTime<Utc>),
    /// Unique identifier
    Guid(Uuid),
    /// Nested list or map, kept as JSON
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Canonical text used to key identifier remaps.
    ///
    /// Only values that can plausibly be identifiers have a key.
    pub fn identity_key(&self) -> Option<String> {
        match self {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Guid(g) => Some(g.hyphenated().to_string()),
            _ => None,
        }
    }

    /// Loose equality across representations.
    ///
    /// Stores hand values back in their own storage classes: an integer
    /// written into a REAL column comes back as a float, a GUID as text,
    /// a boolean as 0/1. Those must still compare equal to what was written.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => (*a as i64) == *b,
            (Value::Guid(a), Value::String(b)) | (Value::String(b), Value::Guid(a)) => {
                Uuid::parse_str(b).map(|b| b == *a).unwrap_or(false)
            }
            (Value::DateTime(a), Value::String(b)) | (Value::String(b), Value::DateTime(a)) => {
                DateTime::parse_from_rfc3339(b)
                    .map(|b| b.with_timezone(&Utc) == *a)
                    .unwrap_or(false)
            }
            _ => self == other,
        }
    }

    /// Ordering used when sorting rows in memory (nulls first)
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => self.to_string().cmp(&other.to_string()),
            },
        }
    }

    /// Convert to JSON for serialization
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Guid(g) => serde_json::Value::String(g.to_string()),
            Value::Json(j) => j.clone(),
        }
    }

    /// Parse from JSON value, coercing identifier and timestamp strings
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    // beyond i64; kept exact as text
                    Value::String(n.to_string())
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::from_text(s),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Value::Json(json.clone()),
        }
    }

    /// Coerce a text value: hyphenated GUIDs and RFC 3339 timestamps are
    /// recognized, everything else stays a string
    pub fn from_text(s: &str) -> Self {
        // Uuid::parse_str also accepts the 32-digit simple form; only the
        // hyphenated form is treated as an identifier
        if s.len() == 36 {
            if let Ok(guid) = Uuid::parse_str(s) {
                return Value::Guid(guid);
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Value::DateTime(dt.with_timezone(&Utc));
        }
        Value::String(s.to_string())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "(null)"),
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bool(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Guid(g) => write!(f, "{}", g),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

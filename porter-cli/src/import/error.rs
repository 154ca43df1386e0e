use crate::resolver::CycleError;
use crate::store::StoreError;

/// Why a unit, record or run could not be applied
#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    /// Malformed unit: unknown entity, wrong shape, storage name mismatch.
    /// Fails the whole unit.
    Structural { locator: String, reason: String },
    /// Dependency cycle; the run never starts
    Resolution(CycleError),
    /// Duplicate in create mode, or ambiguous natural-key matches
    Conflict {
        entity: String,
        reason: String,
        /// Identifiers of the conflicting rows
        matches: Vec<String>,
    },
    /// No row to update
    NotFound { entity: String, reason: String },
    /// The store rejected a mutation; the record's transaction was rolled back
    Persistence(StoreError),
}

impl ImportError {
    /// Short label used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Structural { .. } => "structural",
            ImportError::Resolution(_) => "resolution",
            ImportError::Conflict { .. } => "conflict",
            ImportError::NotFound { .. } => "not found",
            ImportError::Persistence(_) => "persistence",
        }
    }

    pub fn structural(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        ImportError::Structural {
            locator: locator.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Structural { locator, reason } => {
                write!(f, "Invalid unit {}: {}", locator, reason)
            }
            ImportError::Resolution(cycle) => write!(f, "{}", cycle),
            ImportError::Conflict {
                entity,
                reason,
                matches,
            } => {
                if matches.is_empty() {
                    write!(f, "{} conflict: {}", entity, reason)
                } else {
                    write!(f, "{} conflict: {} (matches: {})", entity, reason, matches.join(", "))
                }
            }
            ImportError::NotFound { entity, reason } => write!(f, "{} not found: {}", entity, reason),
            ImportError::Persistence(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<StoreError> for ImportError {
    fn from(err: StoreError) -> Self {
        ImportError::Persistence(err)
    }
}

impl From<CycleError> for ImportError {
    fn from(err: CycleError) -> Self {
        ImportError::Resolution(err)
    }
}

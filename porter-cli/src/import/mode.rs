use serde::{Deserialize, Serialize};

/// Conflict-resolution mode for an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Insert only; any existing match is a conflict
    #[default]
    Create,
    /// Modify the matching row in place
    Update,
    /// Delete the matching row and insert the record anew
    Replace,
}

impl ImportMode {
    pub fn label(&self) -> &'static str {
        match self {
            ImportMode::Create => "create",
            ImportMode::Update => "update",
            ImportMode::Replace => "replace",
        }
    }

    /// Whether this mode may delete existing rows
    pub fn is_destructive(&self) -> bool {
        matches!(self, ImportMode::Replace)
    }
}

impl std::fmt::Display for ImportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

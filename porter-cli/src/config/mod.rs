//! Configuration: `~/.config/porter/config.toml`, environment and CLI flags
//!
//! Precedence, lowest first: built-in defaults, config file, `PORTER_*`
//! environment variables (a `.env` file is honoured), command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::ExportFormat;
use crate::import::ImportMode;

pub const DATABASE_URL_ENV: &str = "PORTER_DATABASE_URL";
pub const SCHEMA_ENV: &str = "PORTER_SCHEMA";

fn default_database_url() -> String {
    "sqlite://porter.db".to_string()
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("porter.toml")
}

fn default_true() -> bool {
    true
}

/// Settings shared by all commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// sqlx connection string, or `memory` for a throwaway in-process store
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Registry schema file
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
    pub default_mode: ImportMode,
    /// Ask before a non-dry-run replace on an interactive terminal
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,
    pub export_format: ExportFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            schema_path: default_schema_path(),
            default_mode: ImportMode::default(),
            confirm_destructive: true,
            export_format: ExportFormat::default(),
        }
    }
}

impl Config {
    /// Default config file location (`~/.config/porter/config.toml`)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("porter")
            .join("config.toml")
    }

    /// Parse a config document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config file")
    }

    /// Load from `path`, or the default location when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file does not exist: {}", path.display());
            }
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `PORTER_*` overrides from a variable lookup
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.database_url = url;
        }
        if let Some(schema) = lookup(SCHEMA_ENV).filter(|v| !v.is_empty()) {
            self.schema_path = PathBuf::from(schema);
        }
    }

    /// Apply `PORTER_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }
}

//! Command-line interface

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use crate::config::Config;
use crate::registry::StaticRegistry;
use crate::store::{MemoryStore, SqliteStore, Store};
use commands::export::ExportCommands;
use commands::import::ImportCommands;
use commands::plan::PlanCommands;

#[derive(Parser)]
#[command(
    name = "porter",
    about = "Dependency-ordered data import and export",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (default: ~/.config/porter/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Entity schema file (toml, yaml or json)
    #[arg(long, global = true)]
    pub schema: Option<PathBuf>,

    /// Database URL, or `memory` for an in-process store
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import unit files in dependency order
    Import(ImportCommands),
    /// Show the resolved import order without touching the store
    Plan(PlanCommands),
    /// Export stored rows as unit files
    Export(ExportCommands),
}

impl Cli {
    /// Default env_logger filter for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Resolve the effective configuration: file, then environment, then flags
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        config.apply_env();

        if let Some(schema) = &self.schema {
            config.schema_path = schema.clone();
        }
        if let Some(database) = &self.database {
            config.database_url = database.clone();
        }

        Ok(config)
    }
}

/// Everything a command handler needs
pub struct CommandContext {
    pub config: Config,
    pub registry: StaticRegistry,
}

impl CommandContext {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config = cli.resolve_config()?;
        let registry = StaticRegistry::from_file(&config.schema_path).with_context(|| {
            format!(
                "Failed to load entity schema (use --schema or set {})",
                crate::config::SCHEMA_ENV
            )
        })?;

        Ok(Self { config, registry })
    }

    /// Open the configured store
    pub async fn open_store(&self) -> Result<Box<dyn Store>> {
        let url = self.config.database_url.as_str();
        if url == "memory" {
            log::info!("Using in-memory store");
            return Ok(Box::new(MemoryStore::new(&self.registry)));
        }

        let store = SqliteStore::connect(url)
            .await
            .with_context(|| format!("Failed to open database: {}", url))?;
        Ok(Box::new(store))
    }
}

/// Run the parsed command and return the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let context = CommandContext::load(&cli)?;

    match cli.command {
        Commands::Import(args) => commands::import::handle_import_command(args, &context).await,
        Commands::Plan(args) => commands::plan::handle_plan_command(args, &context),
        Commands::Export(args) => commands::export::handle_export_command(args, &context).await,
    }
}

mod handler;

pub use handler::handle_import_command;

use std::path::PathBuf;

use clap::Args;

use crate::import::ImportMode;

#[derive(Args, Debug)]
pub struct ImportCommands {
    /// Directory of unit files, or a single unit file
    pub source: PathBuf,

    /// Conflict-resolution mode (defaults to the configured mode)
    #[arg(long, value_enum)]
    pub mode: Option<ImportMode>,

    /// Detect and report without changing the store
    #[arg(long)]
    pub dry_run: bool,

    /// Match existing rows on this field instead of the default natural keys
    #[arg(long)]
    pub match_field: Option<String>,

    /// Write an Excel report of the run
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Do not ask for confirmation before replacing rows
    #[arg(long, short = 'y')]
    pub yes: bool,
}

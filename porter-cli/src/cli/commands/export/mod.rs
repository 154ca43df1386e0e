mod handler;

pub use handler::handle_export_command;

use std::path::PathBuf;

use clap::Args;

use crate::export::ExportFormat;

#[derive(Args, Debug)]
pub struct ExportCommands {
    /// Entity name (or storage name) to export
    pub entity: String,

    /// Export the single row with this identifier
    #[arg(long)]
    pub id: Option<String>,

    /// Exact-match filter, repeatable (column=value)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Sort by this column
    #[arg(long)]
    pub order_by: Option<String>,

    /// Sort descending
    #[arg(long)]
    pub desc: bool,

    /// Maximum number of rows
    #[arg(long)]
    pub limit: Option<usize>,

    /// Replace generated columns with placeholders and mark them optional
    #[arg(long)]
    pub template: bool,

    /// Output format (defaults to the configured format)
    #[arg(long, value_enum)]
    pub format: Option<ExportFormat>,

    /// Write to a file instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

mod handler;

pub use handler::handle_plan_command;

use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct PlanCommands {
    /// Directory of unit files, or a single unit file
    pub source: PathBuf,

    /// Also print the order for clearing these entities (dependents first)
    #[arg(long)]
    pub delete_order: bool,
}

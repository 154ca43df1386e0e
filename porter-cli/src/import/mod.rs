//! Import pipeline: filter, remap, detect conflicts and apply records
//! under a create, update or replace policy

pub mod conflict;
mod engine;
mod error;
pub mod filter;
mod mode;
mod remap;

pub use conflict::{Conflict, ConflictResolver, ConflictSet, NATURAL_KEY_FIELDS};
pub use engine::{Action, ImportEngine, ImportOptions, Outcome, RunScope};
pub use error::ImportError;
pub use mode::ImportMode;
pub use remap::IdRemap;

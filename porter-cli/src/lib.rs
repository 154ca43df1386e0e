//! Porter: dependency-ordered data import and export
//!
//! Unit files (YAML or JSON, one entity type each) are discovered, ordered by
//! the entity dependency graph, and applied to a store in create, update or
//! replace mode. Identifier changes made by replace or natural-key updates
//! are remapped into every later record of the same run.

#[macro_use]
pub mod record;

pub mod cli;
pub mod config;
pub mod export;
pub mod import;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod store;

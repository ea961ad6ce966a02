//! SQLite storage layer.
//!
//! Host adapter for the engine's collaborators:
//! - the local directory (subjects, groups, attributes, field kinds)
//! - the shared cache that carries sync locks across processes
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - [`SqliteStorage`] and its trait implementations
//! - [`import`] - JSONL import of subjects

pub mod import;
pub mod schema;
pub mod sqlite;

pub use import::{DirectoryRecord, ImportStats};
pub use sqlite::SqliteStorage;

//! Configuration management.
//!
//! This module resolves the crmsync directories and loads [`Settings`].
//!
//! # Layout
//!
//! - **Settings**: `~/.crmsync/config.json`
//! - **Database**: `~/.crmsync/data/directory.db` (local directory + lock cache)
//!
//! Both can be moved with a CLI flag or an environment variable.

mod settings;

pub use settings::{RemoteEndpoint, Settings};

use std::path::{Path, PathBuf};

/// Get the global crmsync directory location (`~/.crmsync/`).
#[must_use]
pub fn global_crmsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".crmsync"))
}

/// Resolve the settings file path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `CRMSYNC_CONFIG` environment variable
/// 3. Global location: `~/.crmsync/config.json`
#[must_use]
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var("CRMSYNC_CONFIG") {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    global_crmsync_dir().map(|dir| dir.join("config.json"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `CRMSYNC_DB` environment variable
/// 3. Global location: `~/.crmsync/data/directory.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("CRMSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_crmsync_dir().map(|dir| dir.join("data").join("directory.db"))
}

//! Command implementations.

pub mod completions;
pub mod config;
pub mod mapping;
pub mod subject;
pub mod sync;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{resolve_config_path, resolve_db_path, Settings};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::log::TracingSink;
use crate::remote::HttpTransport;
use crate::storage::SqliteStorage;

/// Load settings from the resolved config path; `--dry-run` forces dry-run mode.
pub(crate) fn load_settings(config_path: Option<&PathBuf>, dry_run: bool) -> Result<Settings> {
    let path = resolve_config_path(config_path.map(PathBuf::as_path));
    let mut settings = Settings::load(path.as_deref())?;
    if dry_run {
        settings.dry_run = true;
    }
    Ok(settings)
}

pub(crate) fn db_path(db_path: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("could not determine the database path, pass --db".into()))
}

pub(crate) fn open_storage(db_path: &Path) -> Result<SqliteStorage> {
    SqliteStorage::open(db_path)
}

/// Engine over the SQLite directory and lock cache, talking HTTP.
pub(crate) fn build_engine(settings: Settings, db: Option<&PathBuf>) -> Result<Engine> {
    // Fail on missing connection details before touching the database.
    settings.validate_remote()?;
    let storage = Arc::new(open_storage(&db_path(db)?)?);
    let transport = HttpTransport::new().map_err(|e| Error::Other(e.to_string()))?;
    Engine::new(
        settings,
        Arc::new(transport),
        Arc::clone(&storage) as Arc<dyn crate::directory::LocalDirectory>,
        storage,
        Arc::new(TracingSink),
    )
}

//! Config command implementations.

use std::path::PathBuf;

use serde_json::{json, Value};

use super::{db_path, load_settings};
use crate::cli::ConfigCommands;
use crate::config::resolve_config_path;
use crate::error::Result;

const REDACTED: &str = "***";

/// Execute config commands.
pub fn execute(command: &ConfigCommands, config: Option<&PathBuf>, db: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => show(config),
        ConfigCommands::Path => path(config, db, json),
    }
}

fn show(config: Option<&PathBuf>) -> Result<()> {
    let settings = load_settings(config, false)?;
    let mut value = serde_json::to_value(&settings)?;
    if let Value::Object(obj) = &mut value {
        for key in ["secret", "siteKey"] {
            if obj.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
                obj.insert(key.to_string(), json!(REDACTED));
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn path(config: Option<&PathBuf>, db: Option<&PathBuf>, json: bool) -> Result<()> {
    let config_path = resolve_config_path(config.map(PathBuf::as_path));
    let db_path = db_path(db)?;

    if json {
        let output = json!({
            "config": config_path.as_ref().map(|p| p.display().to_string()),
            "config_exists": config_path.as_ref().is_some_and(|p| p.exists()),
            "db": db_path.display().to_string(),
            "db_exists": db_path.exists(),
        });
        println!("{output}");
        return Ok(());
    }

    match config_path {
        Some(p) if p.exists() => println!("config: {}", p.display()),
        Some(p) => println!("config: {} (missing, defaults apply)", p.display()),
        None => println!("config: (none)"),
    }
    println!("db:     {}", db_path.display());
    Ok(())
}

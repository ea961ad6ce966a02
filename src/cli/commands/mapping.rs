//! Mapping command implementations.

use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;

use super::load_settings;
use crate::cli::MappingCommands;
use crate::error::{Error, Result};
use crate::mapping::FieldMapping;

#[derive(Serialize)]
struct MappingRow<'a> {
    local_path: String,
    entity: &'a str,
    field: &'a str,
    params: &'a crate::mapping::Params,
    read_only: bool,
}

impl<'a> From<&'a FieldMapping> for MappingRow<'a> {
    fn from(m: &'a FieldMapping) -> Self {
        Self {
            local_path: m.local_path().to_string(),
            entity: m.remote_entity(),
            field: m.remote_field(),
            params: m.params(),
            read_only: m.local_path().is_read_only(),
        }
    }
}

/// Execute mapping commands.
pub fn execute(command: &MappingCommands, config: Option<&PathBuf>, json: bool) -> Result<()> {
    let settings = load_settings(config, false)?;
    let mappings = settings.field_mappings()?;

    let rows: Vec<MappingRow<'_>> = match command {
        MappingCommands::Check => mappings.iter().map(MappingRow::from).collect(),
        MappingCommands::Siblings { path, include_self } => {
            if mappings.find(path).is_none() {
                return Err(Error::InvalidArgument(format!("no mapping for local path '{path}'")));
            }
            mappings
                .siblings_of_local_path(path, *include_self)
                .into_iter()
                .map(MappingRow::from)
                .collect()
        }
    };

    if json {
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No mappings.");
        return Ok(());
    }
    for row in &rows {
        let params = if row.params.is_empty() {
            String::new()
        } else {
            serde_json::to_string(row.params)?
        };
        let lock = if row.read_only { " (read-only)".dimmed().to_string() } else { String::new() };
        println!(
            "{}{lock} → {}.{} {}",
            row.local_path.bold(),
            row.entity.cyan(),
            row.field,
            params.dimmed()
        );
    }
    if matches!(command, MappingCommands::Check) {
        println!();
        println!("{} {} mapping(s) valid", "✓".green(), rows.len());
    }
    Ok(())
}

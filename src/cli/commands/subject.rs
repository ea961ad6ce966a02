//! Subject command implementations (local directory).

use std::path::PathBuf;

use colored::Colorize;

use super::{db_path, open_storage};
use crate::cli::SubjectCommands;
use crate::directory::LocalDirectory;
use crate::error::{Error, Result};
use crate::mapping::{FieldKind, LocalPath};

/// Execute subject commands.
pub fn execute(command: &SubjectCommands, db: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(&db_path(db)?)?;

    match command {
        SubjectCommands::Import { file } => {
            let stats = storage.import_jsonl(file)?;
            if json {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                println!(
                    "{} Imported {} subject(s), {} field kind(s)",
                    "✓".green(),
                    stats.subjects,
                    stats.field_kinds
                );
            }
        }
        SubjectCommands::Show { id } => {
            let subject = storage
                .find_subject(*id)?
                .ok_or(Error::SubjectNotFound { id: *id })?;
            if json {
                println!("{}", serde_json::to_string(&subject)?);
            } else {
                println!("{} {}", "Subject".bold(), subject.id);
                println!("  status: {}", subject.status);
                if !subject.groups.is_empty() {
                    let groups: Vec<String> = subject.groups.iter().map(ToString::to_string).collect();
                    println!("  groups: {}", groups.join(", "));
                }
                for (path, value) in &subject.attributes {
                    println!("  {} = {}", path.cyan(), value);
                }
            }
        }
        SubjectCommands::Kind { path, kind } => {
            let local: LocalPath = path.parse()?;
            let kind = match kind.to_lowercase().as_str() {
                "text" => FieldKind::Text,
                "list" => FieldKind::List,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "invalid field kind '{other}', expected text or list"
                    )));
                }
            };
            storage.set_field_kind(&local, kind)?;
            if json {
                println!("{}", serde_json::json!({"path": path, "kind": kind.as_str()}));
            } else {
                println!("{} {path} is now {}", "✓".green(), kind.as_str());
            }
        }
    }
    Ok(())
}

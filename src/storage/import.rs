//! JSONL import into the local directory.
//!
//! Each line is one record discriminated by `type`:
//!
//! ```text
//! {"type":"subject","id":1,"groups":[3],"attributes":{"user.email":"a@example.org"}}
//! {"type":"field_kind","path":"profile.interests","kind":"list"}
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::directory::Subject;
use crate::error::{Error, Result};
use crate::mapping::{FieldKind, LocalPath};
use crate::storage::SqliteStorage;

/// One line of an import file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryRecord {
    Subject(Subject),
    FieldKind { path: String, kind: String },
}

/// Counts from an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub subjects: usize,
    pub field_kinds: usize,
}

/// Read all records from a JSONL file.
///
/// Blank lines are skipped. Invalid lines fail with their line number.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is invalid.
pub fn read_jsonl(path: &Path) -> Result<Vec<DirectoryRecord>> {
    if !path.exists() {
        return Err(Error::InvalidArgument(format!(
            "import file not found: {}",
            path.display()
        )));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            Error::InvalidArgument(format!("invalid record at line {}: {e}", line_num + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

impl SqliteStorage {
    /// Import subjects and field kinds from a JSONL file.
    ///
    /// Existing subjects with the same id are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is invalid or a write fails.
    pub fn import_jsonl(&self, path: &Path) -> Result<ImportStats> {
        let records = read_jsonl(path)?;
        let mut stats = ImportStats::default();
        for record in records {
            match record {
                DirectoryRecord::Subject(subject) => {
                    self.upsert_subject(&subject)?;
                    stats.subjects += 1;
                }
                DirectoryRecord::FieldKind { path, kind } => {
                    let path: LocalPath = path.parse()?;
                    self.set_field_kind(&path, FieldKind::from_name(&kind))?;
                    stats.field_kinds += 1;
                }
            }
        }
        tracing::debug!(subjects = stats.subjects, field_kinds = stats.field_kinds, "Imported directory records");
        Ok(stats)
    }
}

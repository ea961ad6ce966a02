//! Database schema for the local directory and the shared cache.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema.
///
/// Timestamps are INTEGER Unix milliseconds. Attribute values are JSON text.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Subjects: local user records
CREATE TABLE IF NOT EXISTS subjects (
    id INTEGER PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'enabled' CHECK (status IN ('enabled', 'disabled')),
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subject_groups (
    subject_id INTEGER NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
    group_id INTEGER NOT NULL,
    PRIMARY KEY (subject_id, group_id)
);

CREATE INDEX IF NOT EXISTS idx_subject_groups_group ON subject_groups(group_id);

-- Attributes keyed by full local path (user.email, profile.firstname)
CREATE TABLE IF NOT EXISTS subject_attributes (
    subject_id INTEGER NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (subject_id, path)
);

-- Storage kind per local path (text, list)
CREATE TABLE IF NOT EXISTS field_kinds (
    path TEXT PRIMARY KEY,
    kind TEXT NOT NULL
);

-- Shared cache: sync locks
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

/// Apply the schema to the database.
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_status_is_checked() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let bad = conn.execute(
            "INSERT INTO subjects (id, status, updated_at) VALUES (1, 'gone', 0)",
            [],
        );
        assert!(bad.is_err());
    }
}

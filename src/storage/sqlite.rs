//! SQLite storage implementation.
//!
//! One database holds the local directory (subjects, their groups and
//! attributes, per-path field kinds) and the shared cache used for sync
//! locks. Several `crmsync` processes may open the same file; the cache
//! table is what coordinates them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::cache::SharedCache;
use crate::directory::{AccountStatus, LocalDirectory, Subject, SubjectFilter};
use crate::error::{Error, Result};
use crate::mapping::{FieldKind, LocalPath};
use crate::storage::schema::apply_schema;

/// SQLite-based directory and cache.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the parent directory and applies the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("database connection mutex poisoned".into()))
    }

    // ==================
    // Subject Operations
    // ==================

    /// Insert or replace a subject with its groups and attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn upsert_subject(&self, subject: &Subject) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO subjects (id, status, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            rusqlite::params![subject.id, subject.status.as_str(), now],
        )?;

        tx.execute("DELETE FROM subject_groups WHERE subject_id = ?1", [subject.id])?;
        for group in &subject.groups {
            tx.execute(
                "INSERT OR IGNORE INTO subject_groups (subject_id, group_id) VALUES (?1, ?2)",
                [subject.id, *group],
            )?;
        }

        tx.execute("DELETE FROM subject_attributes WHERE subject_id = ?1", [subject.id])?;
        for (path, value) in &subject.attributes {
            tx.execute(
                "INSERT INTO subject_attributes (subject_id, path, value) VALUES (?1, ?2, ?3)",
                rusqlite::params![subject.id, path, serde_json::to_string(value)?],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// All subjects ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        let conn = self.conn()?;
        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM subjects ORDER BY id")?
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut subjects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(subject) = load_subject(&conn, id)? {
                subjects.push(subject);
            }
        }
        Ok(subjects)
    }

    /// Number of stored subjects.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_subjects(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM subjects", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Declare how the attribute at `path` is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_field_kind(&self, path: &LocalPath, kind: FieldKind) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO field_kinds (path, kind) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET kind = excluded.kind",
            rusqlite::params![path.to_string(), kind.as_str()],
        )?;
        Ok(())
    }

    /// Drop expired cache entries. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            [now_ms()],
        )?;
        Ok(removed)
    }
}

fn load_subject(conn: &Connection, id: i64) -> Result<Option<Subject>> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM subjects WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    let Some(status) = status else {
        return Ok(None);
    };

    let groups: Vec<i64> = conn
        .prepare("SELECT group_id FROM subject_groups WHERE subject_id = ?1 ORDER BY group_id")?
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    let mut attributes = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT path, value FROM subject_attributes WHERE subject_id = ?1")?;
    let rows = stmt.query_map([id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (path, raw) = row?;
        attributes.insert(path, serde_json::from_str(&raw)?);
    }

    let status = if status == "disabled" {
        AccountStatus::Disabled
    } else {
        AccountStatus::Enabled
    };
    let mut subject = Subject::new(id).with_status(status).with_groups(groups);
    subject.attributes = attributes;
    Ok(Some(subject))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expires_at(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl LocalDirectory for SqliteStorage {
    fn find_subjects(&self, filter: &SubjectFilter) -> Result<Vec<Subject>> {
        Ok(filter.apply(self.list_subjects()?))
    }

    fn find_subject(&self, id: i64) -> Result<Option<Subject>> {
        let conn = self.conn()?;
        load_subject(&conn, id)
    }

    fn field_kind(&self, path: &LocalPath) -> FieldKind {
        let kind = self.conn().and_then(|conn| {
            conn.query_row(
                "SELECT kind FROM field_kinds WHERE path = ?1",
                [path.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(Error::from)
        });
        match kind {
            Ok(kind) => kind.as_deref().map_or(FieldKind::Text, FieldKind::from_name),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to read field kind");
                FieldKind::Text
            }
        }
    }

    fn save(&self, subject: &Subject) -> Result<bool> {
        self.upsert_subject(subject)?;
        Ok(true)
    }
}

impl SharedCache for SqliteStorage {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            rusqlite::params![key, value, expires_at(ttl)],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
        Ok(())
    }

    fn delete_if(&self, key: &str, value: &str) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE key = ?1 AND value = ?2",
            [key, value],
        )?;
        Ok(removed == 1)
    }

    /// Single statement: inserts, or replaces an expired entry.
    fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let changed = self.conn()?.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
             WHERE cache_entries.expires_at <= ?4",
            rusqlite::params![key, value, expires_at(ttl), now_ms()],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject() -> Subject {
        Subject::new(4)
            .with_groups(vec![2, 1])
            .with_attribute("user.email", "ada@example.org")
            .with_attribute("profile.crm_contact_id", 40)
            .with_attribute("profile.interests", json!(["a", "b"]))
    }

    #[test]
    fn test_subject_round_trip() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage.upsert_subject(&subject()).unwrap();

        let loaded = storage.find_subject(4).unwrap().unwrap();
        assert_eq!(loaded.groups, vec![1, 2]);
        assert_eq!(loaded.email(), Some("ada@example.org"));
        assert_eq!(loaded.attributes["profile.interests"], json!(["a", "b"]));
        assert!(storage.find_subject(5).unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_attributes_and_status() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage.upsert_subject(&subject()).unwrap();

        let mut changed = subject().with_status(AccountStatus::Disabled);
        changed.attributes.remove("profile.interests");
        assert!(storage.save(&changed).unwrap());

        let loaded = storage.find_subject(4).unwrap().unwrap();
        assert_eq!(loaded.status, AccountStatus::Disabled);
        assert!(!loaded.attributes.contains_key("profile.interests"));
        assert_eq!(storage.count_subjects().unwrap(), 1);
    }

    #[test]
    fn test_find_subjects_applies_filter() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage.upsert_subject(&subject()).unwrap();
        storage.upsert_subject(&Subject::new(5)).unwrap();

        let filter = SubjectFilter::from_settings(&crate::config::Settings::default());
        let found = storage.find_subjects(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 4);
    }

    #[test]
    fn test_field_kinds() {
        let storage = SqliteStorage::open_memory().unwrap();
        let path: LocalPath = "profile.interests".parse().unwrap();
        assert_eq!(storage.field_kind(&path), FieldKind::Text);
        storage.set_field_kind(&path, FieldKind::List).unwrap();
        assert_eq!(storage.field_kind(&path), FieldKind::List);
    }

    #[test]
    fn test_cache_add_and_expiry() {
        let storage = SqliteStorage::open_memory().unwrap();
        assert!(storage.add("lock", "1", Duration::from_secs(30)).unwrap());
        assert!(!storage.add("lock", "1", Duration::from_secs(30)).unwrap());
        assert_eq!(storage.get("lock").unwrap().as_deref(), Some("1"));

        assert!(!storage.delete_if("lock", "2").unwrap());
        assert!(storage.delete_if("lock", "1").unwrap());
        assert!(storage.get("lock").unwrap().is_none());

        storage.set("stale", "1", Duration::ZERO).unwrap();
        assert!(storage.get("stale").unwrap().is_none());
        assert!(storage.add("stale", "2", Duration::from_secs(30)).unwrap());
        assert_eq!(storage.get("stale").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_database_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("directory.db");
        let a = SqliteStorage::open(&path).unwrap();
        let b = SqliteStorage::open(&path).unwrap();

        assert!(a.add("crm-sync-block.1", "1", Duration::from_secs(30)).unwrap());
        assert!(!b.add("crm-sync-block.1", "1", Duration::from_secs(30)).unwrap());

        b.set("old", "1", Duration::ZERO).unwrap();
        assert_eq!(a.purge_expired().unwrap(), 1);
        assert!(b.get("crm-sync-block.1").unwrap().is_some());
    }
}

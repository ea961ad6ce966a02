//! Local directory contract.
//!
//! The engine reads and writes subjects only through [`LocalDirectory`].
//! A [`Subject`] keeps its attributes keyed by full local path
//! (`user.email`, `profile.firstname`, ...).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::error::Result;
use crate::mapping::{value, FieldKind, LocalPath};

/// Attribute holding the subject e-mail.
pub const EMAIL_PATH: &str = "user.email";

/// Whether a subject may log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Enabled,
    Disabled,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local record being reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub groups: Vec<i64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl Subject {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self {
            id,
            status: AccountStatus::Enabled,
            groups: Vec::new(),
            attributes: BTreeMap::new(),
            dirty: false,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(path.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_groups(mut self, groups: Vec<i64>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.attributes
            .get(EMAIL_PATH)
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
    }

    /// Stored value at `path`, `Null` when absent.
    #[must_use]
    pub fn attribute(&self, path: &LocalPath) -> &Value {
        self.attributes.get(&path.to_string()).unwrap_or(&Value::Null)
    }

    /// Store a value and mark the subject dirty. Returns whether it changed.
    pub fn put(&mut self, path: &LocalPath, value: Value) -> bool {
        let key = path.to_string();
        if self.attributes.get(&key) == Some(&value) {
            return false;
        }
        self.attributes.insert(key, value);
        self.dirty = true;
        true
    }

    /// Numeric id stored at `path`; zero, blanks and non-numbers are `None`.
    #[must_use]
    pub fn id_at(&self, path: &LocalPath) -> Option<i64> {
        match self.attribute(path) {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|id| *id != 0)
    }

    /// Change the account status. Returns whether it changed.
    pub fn set_status(&mut self, status: AccountStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.dirty = true;
        true
    }

    #[must_use]
    pub fn in_any_group(&self, groups: &[i64]) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Selection of subjects connected to the remote CRM.
#[derive(Debug, Clone)]
pub struct SubjectFilter {
    pub contact_id_path: LocalPath,
    /// When non-empty, only subjects linked to these contacts.
    pub restrict_to: Vec<i64>,
    /// When set, only subjects whose attribute is still empty.
    pub retry_gate: Option<LocalPath>,
    pub include_groups: Vec<i64>,
    pub exclude_groups: Vec<i64>,
    /// Zero means no limit.
    pub limit: u32,
    pub offset: u32,
}

impl SubjectFilter {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            contact_id_path: settings.contact_id_path(),
            restrict_to: settings.restrict_to_contact_ids.clone(),
            retry_gate: settings.retry_gate_path(),
            include_groups: settings.include_groups.clone(),
            exclude_groups: settings.exclude_groups.clone(),
            limit: settings.limit,
            offset: settings.offset,
        }
    }

    /// Whether `subject` belongs to the connected set, ignoring paging.
    #[must_use]
    pub fn matches(&self, subject: &Subject) -> bool {
        let contact_id = subject.id_at(&self.contact_id_path);
        let linked = if self.restrict_to.is_empty() {
            contact_id.is_some()
        } else {
            contact_id.is_some_and(|id| self.restrict_to.contains(&id))
        };
        if !linked {
            return false;
        }
        if let Some(gate) = &self.retry_gate {
            if !value::is_empty(subject.attribute(gate)) {
                return false;
            }
        }
        if !self.include_groups.is_empty() && !subject.in_any_group(&self.include_groups) {
            return false;
        }
        !subject.in_any_group(&self.exclude_groups)
    }

    /// Filter `subjects` (in id order) and apply offset and limit.
    #[must_use]
    pub fn apply(&self, subjects: impl IntoIterator<Item = Subject>) -> Vec<Subject> {
        let matching = subjects
            .into_iter()
            .filter(|s| self.matches(s))
            .skip(self.offset as usize);
        if self.limit > 0 {
            matching.take(self.limit as usize).collect()
        } else {
            matching.collect()
        }
    }
}

/// Store of local subjects.
pub trait LocalDirectory: Send + Sync {
    /// Subjects selected by `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_subjects(&self, filter: &SubjectFilter) -> Result<Vec<Subject>>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_subject(&self, id: i64) -> Result<Option<Subject>>;

    fn get_attribute(&self, subject: &Subject, path: &LocalPath) -> Value {
        subject.attribute(path).clone()
    }

    /// Write a remote-origin value. Read-only paths are refused.
    fn set_attribute(&self, subject: &mut Subject, path: &LocalPath, value: Value) -> bool {
        if path.is_read_only() {
            return false;
        }
        subject.put(path, value);
        true
    }

    fn field_kind(&self, _path: &LocalPath) -> FieldKind {
        FieldKind::Text
    }

    /// Persist the subject. `Ok(false)` when the store refused it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn save(&self, subject: &Subject) -> Result<bool>;
}

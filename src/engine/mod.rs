//! Reconciliation engine.
//!
//! Every per-subject routine runs the same steps:
//! eligibility, lock, fetch the remote contact (recovering it if it moved),
//! diff, apply, summarize, unlock.
//!
//! - [`base`] - checksum, activity link and account status
//! - [`fields`] - full field sync and on-change sync
//! - [`recovery`] - finding a contact again through the owner id field
//! - [`eligibility`] - group, retry-gate and restriction checks
//! - [`batch`] - grouping staged remote writes
//!
//! Bulk runs process subjects sequentially. Recoverable errors are logged
//! and the run continues with the next subject.

pub mod batch;
mod base;
pub mod eligibility;
mod fields;
mod recovery;

pub use batch::UpdateBatch;
pub use eligibility::Ineligible;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::cache::{SharedCache, SubjectLocks};
use crate::config::Settings;
use crate::context::{FieldChange, SyncContext};
use crate::directory::{LocalDirectory, Subject, SubjectFilter};
use crate::error::{Error, Result};
use crate::log::{fields, EventLog, LogSink, SyncLog};
use crate::mapping::FieldMappingCollection;
use crate::remote::{RemoteGateway, RemoteTransport};

/// Which side wins when values differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Local values are written to the remote CRM.
    #[default]
    FromLocal,
    /// Remote values are written to the local directory.
    FromRemote,
    /// Differences are resolved like [`Direction::FromLocal`].
    Both,
}

impl Direction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FromLocal => "local",
            Self::FromRemote => "remote",
            Self::Both => "both",
        }
    }

    #[must_use]
    pub const fn writes_remote(&self) -> bool {
        matches!(self, Self::FromLocal | Self::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" | "from-local" => Ok(Self::FromLocal),
            "remote" | "from-remote" => Ok(Self::FromRemote),
            "both" => Ok(Self::Both),
            _ => Err(Error::InvalidArgument(format!(
                "invalid direction '{s}', expected local, remote or both"
            ))),
        }
    }
}

/// Why a subject was not synced. Skips are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No remote contact id stored locally.
    NotLinked,
    NotEligible,
    /// Another invocation holds the subject lock.
    Locked,
    /// The triggering sync kind is disabled in settings.
    Disabled,
    /// An on-change event without changed fields.
    NoChanges,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotLinked => "no_contact_id",
            Self::NotEligible => "not_eligible_for_sync",
            Self::Locked => "subject_locked",
            Self::Disabled => "sync_disabled",
            Self::NoChanges => "no_changed_fields",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one per-subject routine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Synced { changes: Vec<FieldChange> },
    Skipped(SkipReason),
}

impl SyncOutcome {
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        match self {
            Self::Synced { changes } => changes,
            Self::Skipped(_) => &[],
        }
    }

    #[must_use]
    pub const fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Synced { .. } => None,
            Self::Skipped(reason) => Some(*reason),
        }
    }
}

/// The synchronization engine.
///
/// Owns the remote gateway and its read cache; one engine serves one
/// invoker at a time.
pub struct Engine {
    settings: Settings,
    mappings: Arc<FieldMappingCollection>,
    gateway: RemoteGateway,
    directory: Arc<dyn LocalDirectory>,
    locks: SubjectLocks,
    sink: Arc<dyn LogSink>,
    log: SyncLog,
}

impl Engine {
    /// Build an engine from settings and its collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the remote connection is not configured,
    /// `Error::Mapping` if the field mapping is invalid.
    pub fn new(
        settings: Settings,
        transport: Arc<dyn RemoteTransport>,
        directory: Arc<dyn LocalDirectory>,
        cache: Arc<dyn SharedCache>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let gateway = RemoteGateway::from_settings(&settings, transport)?;
        let mappings = Arc::new(settings.field_mappings()?);
        let locks = SubjectLocks::new(cache, Duration::from_secs(settings.lock_ttl_secs));
        Ok(Self {
            mappings,
            gateway,
            directory,
            locks,
            log: SyncLog::new(Arc::clone(&sink)),
            sink,
            settings,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn mappings(&self) -> &FieldMappingCollection {
        &self.mappings
    }

    #[must_use]
    pub const fn locks(&self) -> &SubjectLocks {
        &self.locks
    }

    /// Log without a per-run context.
    #[must_use]
    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    // ==================
    // Invoker entry points
    // ==================

    /// Base sync of `subjects`, or of all connected subjects.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error.
    pub fn run_base(&mut self, subjects: Option<Vec<Subject>>) -> Result<Vec<i64>> {
        self.gateway.clear_cache();
        self.sync_bases(subjects)
    }

    /// Full field sync of `subjects`, or of all connected subjects.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error.
    pub fn run_full(&mut self, direction: Direction, subjects: Option<Vec<Subject>>) -> Result<Vec<i64>> {
        self.gateway.clear_cache();
        self.sync_subjects(direction, subjects)
    }

    /// Push changed local fields of one subject.
    ///
    /// `changed` maps field names (bare or full) to their previous values.
    ///
    /// # Errors
    ///
    /// See [`on_change`](Self::on_change).
    pub fn run_on_change(
        &mut self,
        subject_id: i64,
        source: crate::mapping::Source,
        changed: &Map<String, Value>,
    ) -> Result<SyncOutcome> {
        self.gateway.clear_cache();
        self.on_change(subject_id, source, changed)
    }

    /// Top-level bulk run: base sync when enabled, then a full sync when
    /// `autoFullSync` is set or the run is manual.
    ///
    /// Returns the ids of subjects that completed.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error.
    pub fn sync(&mut self, direction: Direction, manual: bool) -> Result<Vec<i64>> {
        self.gateway.clear_cache();
        let subjects = self.connected_subjects()?;
        if subjects.is_empty() {
            self.log.warning("No connected subjects match the criteria", Map::new());
            return Ok(Vec::new());
        }
        self.log.debug(
            "Syncing connected subjects",
            fields([("subject_count", json!(subjects.len()))]),
        );

        let mut handled = if self.settings.enable_base_sync {
            self.base_pass(subjects)?
        } else {
            subjects
        };
        if self.settings.auto_full_sync || manual {
            handled = self.full_pass(direction, handled)?;
        }
        Ok(handled.iter().map(|s| s.id).collect())
    }

    // ==================
    // Bulk runs
    // ==================

    /// Base sync over a subject set. Returns ids of synced subjects.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error.
    pub fn sync_bases(&mut self, subjects: Option<Vec<Subject>>) -> Result<Vec<i64>> {
        let subjects = match subjects {
            Some(subjects) => subjects,
            None => self.connected_subjects()?,
        };
        Ok(self.base_pass(subjects)?.iter().map(|s| s.id).collect())
    }

    /// Full field sync over a subject set. Returns ids of synced subjects.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error.
    pub fn sync_subjects(&mut self, direction: Direction, subjects: Option<Vec<Subject>>) -> Result<Vec<i64>> {
        let subjects = match subjects {
            Some(subjects) => subjects,
            None => self.connected_subjects()?,
        };
        Ok(self.full_pass(direction, subjects)?.iter().map(|s| s.id).collect())
    }

    fn base_pass(&mut self, subjects: Vec<Subject>) -> Result<Vec<Subject>> {
        let total = subjects.len();
        self.log.info(
            "Start base sync for connected subjects",
            fields([("subject_count", json!(total))]),
        );
        let mut handled = Vec::new();
        for mut subject in subjects {
            match self.sync_base(&mut subject) {
                Ok(outcome) if outcome.is_synced() => {
                    handled.push(subject);
                    self.progress("Base sync progress", total, handled.len());
                }
                Ok(_) => {}
                Err(e) if e.is_recoverable() => self.log_bulk_failure("base", subject.id, &e),
                Err(e) => return Err(e),
            }
        }
        self.log.info("End base sync for connected subjects", Map::new());
        Ok(handled)
    }

    fn full_pass(&mut self, direction: Direction, subjects: Vec<Subject>) -> Result<Vec<Subject>> {
        let total = subjects.len();
        self.log.info(
            "Start syncing subjects",
            fields([("subject_count", json!(total)), ("direction", json!(direction.as_str()))]),
        );
        let mut handled = Vec::new();
        for mut subject in subjects {
            match self.sync_subject(&mut subject, direction) {
                Ok(outcome) if outcome.is_synced() => {
                    handled.push(subject);
                    self.progress("Subject sync progress", total, handled.len());
                }
                Ok(_) => {}
                Err(e) if e.is_recoverable() => self.log_bulk_failure("full", subject.id, &e),
                Err(e) => return Err(e),
            }
        }
        self.log.info(
            "End syncing subjects",
            fields([("direction", json!(direction.as_str()))]),
        );
        Ok(handled)
    }

    /// Subjects linked to the remote CRM, narrowed by the configured filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn connected_subjects(&self) -> Result<Vec<Subject>> {
        let filter = SubjectFilter::from_settings(&self.settings);
        if !filter.restrict_to.is_empty() {
            self.log.warning(
                "Restricting all actions to contact ids",
                fields([("contact_ids", json!(filter.restrict_to))]),
            );
        }
        if let Some(gate) = &filter.retry_gate {
            self.log.warning(
                "Acting only on subjects with an empty retry field",
                fields([("field", json!(gate.to_string()))]),
            );
        }
        if filter.limit > 0 || filter.offset > 0 {
            self.log.warning(
                "Paging connected subjects",
                fields([("limit", json!(filter.limit)), ("offset", json!(filter.offset))]),
            );
        }
        if !filter.include_groups.is_empty() {
            self.log.info(
                "Restricting all actions to groups",
                fields([("groups", json!(filter.include_groups))]),
            );
        }
        if !filter.exclude_groups.is_empty() {
            self.log.info(
                "Excluding subjects in groups",
                fields([("groups", json!(filter.exclude_groups))]),
            );
        }
        self.directory.find_subjects(&filter)
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress(&self, prefix: &str, total: usize, handled: usize) {
        let percent = if total == 0 {
            100.0
        } else {
            (handled as f64 / total as f64 * 10_000.0).round() / 100.0
        };
        self.log.info(
            &format!("{prefix} {handled}/{total} ({percent}%)"),
            fields([
                ("handled", json!(handled)),
                ("total", json!(total)),
                ("percent", json!(percent)),
            ]),
        );
    }

    fn log_bulk_failure(&self, pass: &str, subject_id: i64, err: &Error) {
        self.log.error(
            "Subject sync failed, continuing",
            fields([
                ("pass", json!(pass)),
                ("subject_id", json!(subject_id)),
                ("code", json!(err.error_code().as_str())),
                ("error", json!(err.to_string())),
            ]),
        );
    }

    // ==================
    // Shared steps
    // ==================

    fn begin(&self, subject: &Subject, operation: &str, source: Option<&str>) -> SyncContext {
        SyncContext::begin(
            subject.id,
            subject.email(),
            operation,
            source,
            Arc::clone(&self.sink),
        )
    }

    /// Persist `subject` unless in dry-run mode.
    fn save_subject(&self, log: &dyn EventLog, subject: &mut Subject) -> Result<bool> {
        if self.settings.dry_run {
            log.warning(
                "Dry run - skipping local save",
                fields([("subject_id", json!(subject.id))]),
            );
            subject.mark_clean();
            return Ok(true);
        }
        let saved = self.directory.save(subject)?;
        if saved {
            subject.mark_clean();
        }
        Ok(saved)
    }

    /// Load a subject by id.
    fn load_subject(&self, subject_id: i64) -> Result<Subject> {
        self.directory
            .find_subject(subject_id)?
            .ok_or(Error::SubjectNotFound { id: subject_id })
    }

    /// Load subjects by id, in the given order.
    ///
    /// # Errors
    ///
    /// Returns `Error::SubjectNotFound` for the first unknown id.
    pub fn subjects_by_id(&self, ids: &[i64]) -> Result<Vec<Subject>> {
        ids.iter().map(|id| self.load_subject(*id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!("local".parse::<Direction>().unwrap(), Direction::FromLocal);
        assert_eq!("Remote".parse::<Direction>().unwrap(), Direction::FromRemote);
        assert_eq!("both".parse::<Direction>().unwrap(), Direction::Both);
        assert!("sideways".parse::<Direction>().is_err());
        assert!(Direction::Both.writes_remote());
        assert!(!Direction::FromRemote.writes_remote());
    }

    #[test]
    fn test_outcome_accessors() {
        let skipped = SyncOutcome::Skipped(SkipReason::Locked);
        assert!(!skipped.is_synced());
        assert!(skipped.changes().is_empty());
        assert_eq!(skipped.skip_reason().map(|r| r.as_str()), Some("subject_locked"));
    }
}

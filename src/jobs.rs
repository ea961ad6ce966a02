//! Scheduled and manual bulk sync.
//!
//! One job runs at a time across invocations sharing the cache. A job that
//! finds another one running is skipped and never retried.

use serde::Serialize;
use serde_json::json;

use crate::cache::JOB_LOCK_KEY;
use crate::engine::{Direction, Engine};
use crate::error::Result;
use crate::log::{fields, EventLog};

/// A bulk sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncJob {
    pub direction: Direction,
    /// Manual runs always include the full field sync.
    pub manual: bool,
}

impl Default for SyncJob {
    fn default() -> Self {
        Self {
            direction: Direction::FromRemote,
            manual: false,
        }
    }
}

/// What a job did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { subject_ids: Vec<i64> },
    /// Another job held the job lock.
    AlreadyRunning,
}

impl SyncJob {
    #[must_use]
    pub const fn new(direction: Direction, manual: bool) -> Self {
        Self { direction, manual }
    }

    const fn trigger(&self) -> &'static str {
        if self.manual { "manual" } else { "scheduled" }
    }

    /// Run [`Engine::sync`] under the job lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockStore` if the job lock cannot be taken, or the
    /// first unrecoverable sync error.
    pub fn run(&self, engine: &mut Engine) -> Result<JobOutcome> {
        let Some(_guard) = engine.locks().try_acquire_key(JOB_LOCK_KEY)? else {
            engine.log().warning(
                "Sync job already running, skipping",
                fields([("job", json!(JOB_LOCK_KEY))]),
            );
            return Ok(JobOutcome::AlreadyRunning);
        };

        engine.log().info(
            &format!("Starting sync from {} ({})", self.direction, self.trigger()),
            fields([
                ("direction", json!(self.direction.as_str())),
                ("manual", json!(self.manual)),
            ]),
        );
        match engine.sync(self.direction, self.manual) {
            Ok(subject_ids) => {
                engine.log().info(
                    "Sync finished",
                    fields([("subject_count", json!(subject_ids.len()))]),
                );
                Ok(JobOutcome::Completed { subject_ids })
            }
            Err(e) => {
                engine.log().error(
                    "Sync failed, check the remote settings",
                    fields([
                        ("code", json!(e.error_code().as_str())),
                        ("error", json!(e.to_string())),
                    ]),
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_job_pulls_from_remote() {
        let job = SyncJob::default();
        assert_eq!(job.direction, Direction::FromRemote);
        assert_eq!(job.trigger(), "scheduled");
        assert_eq!(SyncJob::new(Direction::FromLocal, true).trigger(), "manual");
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(JobOutcome::Completed { subject_ids: vec![1, 2] }).unwrap();
        assert_eq!(value, json!({"status": "completed", "subject_ids": [1, 2]}));
        assert_eq!(
            serde_json::to_value(JobOutcome::AlreadyRunning).unwrap(),
            json!({"status": "already_running"})
        );
    }
}

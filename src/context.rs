//! Per-run sync context.
//!
//! A [`SyncContext`] is created for one subject and one operation. It
//! carries a correlation id and the remote ids discovered during the run,
//! stamps every event with them and the elapsed time, and keeps a ledger of
//! field changes for the final summary.
//!
//! The terminal methods (`log_success`, `log_skipped`, `fail`) take `self`,
//! so nothing can be logged against a finished run. Dropping a context
//! without a terminal event is how an aborted run clears it.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::log::{fields, EventLog, Level, LogSink, CATEGORY};

/// Number of error sources kept in an error event.
const MAX_ERROR_CHAIN: usize = 5;

/// Field values longer than this are truncated in debug lines.
const MAX_VALUE_LEN: usize = 100;

/// One recorded field change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Correlation and timing state for one sync run.
pub struct SyncContext {
    sync_id: String,
    operation: String,
    subject_id: i64,
    contact_id: Option<i64>,
    activity_id: Option<i64>,
    started: Instant,
    metadata: Map<String, Value>,
    changes: Vec<FieldChange>,
    source: Option<String>,
    sink: Arc<dyn LogSink>,
}

impl SyncContext {
    /// Start a run and emit "Sync started".
    pub fn begin(
        subject_id: i64,
        email: Option<&str>,
        operation: &str,
        source: Option<&str>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let ctx = Self {
            sync_id: generate_sync_id(),
            operation: operation.to_string(),
            subject_id,
            contact_id: None,
            activity_id: None,
            started: Instant::now(),
            metadata: Map::new(),
            changes: Vec::new(),
            source: source.map(str::to_string),
            sink,
        };
        ctx.info("Sync started", fields([("subject_email", json!(email))]));
        ctx
    }

    #[must_use]
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    #[must_use]
    pub const fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn set_contact_id(&mut self, contact_id: Option<i64>) {
        self.contact_id = contact_id;
    }

    pub fn set_activity_id(&mut self, activity_id: Option<i64>) {
        self.activity_id = activity_id;
    }

    pub fn add_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Record a change. A later change to the same field replaces the earlier one.
    pub fn add_change(&mut self, field: &str, old: Value, new: Value) {
        if let Some(existing) = self.changes.iter_mut().find(|c| c.field == field) {
            existing.old = old;
            existing.new = new;
        } else {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old,
                new,
            });
        }
    }

    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    /// Record a change and emit a debug line describing it.
    pub fn log_field_change(&mut self, field: &str, from: Value, to: Value, direction: &str) {
        let payload = fields([
            ("field", json!(field)),
            ("direction", json!(direction)),
            ("from", truncate(&from)),
            ("to", truncate(&to)),
        ]);
        self.add_change(field, from, to);
        self.debug("Field sync", payload);
    }

    /// Emit an error line. The run continues; the caller decides what happens next.
    pub fn log_error(&self, message: &str, cause: Option<&Error>, mut extra: Map<String, Value>) {
        if let Some(err) = cause {
            extra.insert("exception".to_string(), describe_error(err));
        }
        self.error(message, extra);
    }

    /// Finish the run with a summary of all recorded changes.
    pub fn log_success(self, mut extra: Map<String, Value>) -> Vec<FieldChange> {
        let mut summary = fields([
            ("total_changes", json!(self.changes.len())),
            ("changes", json!(self.changes)),
        ]);
        summary.append(&mut extra);
        self.info("Sync completed successfully", summary);
        self.changes
    }

    /// Finish the run as skipped.
    pub fn log_skipped(self, reason: &str, mut extra: Map<String, Value>) {
        let mut payload = fields([("reason", json!(reason))]);
        payload.append(&mut extra);
        self.debug("Sync skipped", payload);
    }

    /// Finish the run as failed.
    pub fn fail(self, message: &str, cause: &Error) {
        self.log_error(message, Some(cause), Map::new());
    }

    #[allow(clippy::cast_precision_loss)]
    fn duration_ms(&self) -> f64 {
        let micros = self.started.elapsed().as_micros() as f64;
        (micros / 10.0).round() / 100.0
    }
}

impl EventLog for SyncContext {
    fn log(&self, level: Level, message: &str, extra: Map<String, Value>) {
        let mut payload = fields([
            ("sync_id", json!(self.sync_id)),
            ("operation", json!(self.operation)),
            ("subject_id", json!(self.subject_id)),
            ("contact_id", json!(self.contact_id)),
            ("activity_id", json!(self.activity_id)),
            ("duration_ms", json!(self.duration_ms())),
            ("source", json!(self.source)),
        ]);
        payload.extend(self.metadata.clone());
        payload.extend(extra);
        payload.retain(|_, v| !v.is_null());
        self.sink.emit(level, CATEGORY, message, &payload);
    }
}

fn generate_sync_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("sync_{}", &uuid[..16])
}

fn truncate(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_VALUE_LEN => {
            let head: String = s.chars().take(MAX_VALUE_LEN).collect();
            Value::String(format!("{head}... (truncated)"))
        }
        other => other.clone(),
    }
}

fn describe_error(err: &Error) -> Value {
    let mut chain = Vec::new();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if chain.len() == MAX_ERROR_CHAIN {
            break;
        }
        chain.push(cause.to_string());
        source = std::error::Error::source(cause);
    }
    json!({
        "code": err.error_code().as_str(),
        "message": err.to_string(),
        "chain": chain,
    })
}

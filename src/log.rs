//! Structured sync event logging.
//!
//! Sync events are structured payloads (`sync_id`, `operation`, ids, timing)
//! handed to a [`LogSink`]. The crate ships [`TracingSink`], which forwards
//! them to `tracing` under the `crm.sync` target. Tests capture events with
//! their own sink.

use serde_json::{Map, Value};

/// Log category used by all sync events.
pub const CATEGORY: &str = "crm.sync";

/// Severity of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Destination for structured sync events.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, category: &str, message: &str, payload: &Map<String, Value>);
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: Level, category: &str, message: &str, payload: &Map<String, Value>) {
        let payload = Value::Object(payload.clone()).to_string();
        match level {
            Level::Debug => tracing::debug!(target: "crm.sync", category, %payload, "{message}"),
            Level::Info => tracing::info!(target: "crm.sync", category, %payload, "{message}"),
            Level::Warning => tracing::warn!(target: "crm.sync", category, %payload, "{message}"),
            Level::Error => tracing::error!(target: "crm.sync", category, %payload, "{message}"),
        }
    }
}

/// Anything sync code can log through: a per-run context or the bare log.
pub trait EventLog {
    fn log(&self, level: Level, message: &str, extra: Map<String, Value>);

    fn debug(&self, message: &str, extra: Map<String, Value>) {
        self.log(Level::Debug, message, extra);
    }

    fn info(&self, message: &str, extra: Map<String, Value>) {
        self.log(Level::Info, message, extra);
    }

    fn warning(&self, message: &str, extra: Map<String, Value>) {
        self.log(Level::Warning, message, extra);
    }

    fn error(&self, message: &str, extra: Map<String, Value>) {
        self.log(Level::Error, message, extra);
    }

    /// Record one remote call.
    fn log_api_call(&self, entity: &str, action: &str, param_count: usize, result_count: Option<usize>) {
        self.debug(
            "CRM API call",
            fields([(
                "api",
                serde_json::json!({
                    "entity": entity,
                    "action": action,
                    "param_count": param_count,
                    "has_result": result_count.is_some(),
                    "result_count": result_count.unwrap_or(0),
                }),
            )]),
        );
    }
}

/// Context-less logging for bulk progress and calls outside a run.
#[derive(Clone)]
pub struct SyncLog {
    sink: std::sync::Arc<dyn LogSink>,
}

impl SyncLog {
    #[must_use]
    pub fn new(sink: std::sync::Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl EventLog for SyncLog {
    fn log(&self, level: Level, message: &str, mut extra: Map<String, Value>) {
        extra.retain(|_, v| !v.is_null());
        self.sink.emit(level, CATEGORY, message, &extra);
    }
}

/// Build a payload map from key/value pairs.
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

//! Error types for crmsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=config, 3=not_found, 4=remote, etc.)
//! - Recoverability flags so bulk runs know whether to continue
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

use crate::mapping::MappingError;

/// Result type alias for crmsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Job runners match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration (exit 2)
    ConfigError,
    InvalidMapping,

    // Not Found (exit 3)
    SubjectNotFound,
    ContactNotFound,
    ActivityNotFound,

    // Remote (exit 4)
    RemoteRejected,
    TransportFailure,
    WriteFailed,

    // Local directory (exit 5)
    LocalSaveFailed,
    DatabaseError,
    LockStoreError,

    // Validation (exit 6)
    InvalidArgument,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::InvalidMapping => "INVALID_MAPPING",
            Self::SubjectNotFound => "SUBJECT_NOT_FOUND",
            Self::ContactNotFound => "CONTACT_NOT_FOUND",
            Self::ActivityNotFound => "ACTIVITY_NOT_FOUND",
            Self::RemoteRejected => "REMOTE_REJECTED",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::WriteFailed => "WRITE_FAILED",
            Self::LocalSaveFailed => "LOCAL_SAVE_FAILED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::LockStoreError => "LOCK_STORE_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::ConfigError | Self::InvalidMapping => 2,
            Self::SubjectNotFound | Self::ContactNotFound | Self::ActivityNotFound => 3,
            Self::RemoteRejected | Self::TransportFailure | Self::WriteFailed => 4,
            Self::LocalSaveFailed | Self::DatabaseError | Self::LockStoreError => 5,
            Self::InvalidArgument => 6,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether a bulk run may continue with the next subject.
    ///
    /// True for per-subject failures (remote errors, missing contacts,
    /// failed saves). False for configuration, storage and internal errors,
    /// which would fail the same way for every remaining subject.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ContactNotFound
                | Self::ActivityNotFound
                | Self::RemoteRejected
                | Self::TransportFailure
                | Self::WriteFailed
                | Self::LocalSaveFailed
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in crmsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid field mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("Subject not found: {id}")]
    SubjectNotFound { id: i64 },

    #[error("Remote contact {contact_id} not found for subject {subject_id} and recovery failed")]
    ContactNotFound { subject_id: i64, contact_id: i64 },

    #[error("No remote activity linked to subject {subject_id}")]
    ActivityNotFound { subject_id: i64 },

    #[error("Remote rejected {entity}.{action}: {message}")]
    RemoteRejected {
        entity: String,
        action: String,
        message: String,
    },

    #[error("Remote call {entity}.{action} failed{}: {message}", status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    TransportFailure {
        entity: String,
        action: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Remote write to {entity} failed")]
    WriteFailed {
        entity: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to save subject {subject_id}")]
    LocalSaveFailed { subject_id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lock store error: {0}")]
    LockStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Mapping(_) => ErrorCode::InvalidMapping,
            Self::SubjectNotFound { .. } => ErrorCode::SubjectNotFound,
            Self::ContactNotFound { .. } => ErrorCode::ContactNotFound,
            Self::ActivityNotFound { .. } => ErrorCode::ActivityNotFound,
            Self::RemoteRejected { .. } => ErrorCode::RemoteRejected,
            Self::TransportFailure { .. } => ErrorCode::TransportFailure,
            Self::WriteFailed { .. } => ErrorCode::WriteFailed,
            Self::LocalSaveFailed { .. } => ErrorCode::LocalSaveFailed,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::LockStore(_) => ErrorCode::LockStoreError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether a bulk run may continue past this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.error_code().is_recoverable()
    }

    /// Context-aware recovery hint for operators.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Config(msg) if msg.contains("url") || msg.contains("secret") || msg.contains("site key") => Some(
                "Set url, secret and siteKey in ~/.crmsync/config.json \
                 or via CRMSYNC_URL, CRMSYNC_SECRET and CRMSYNC_SITE_KEY."
                    .to_string(),
            ),
            Self::Mapping(_) => Some(
                "Each fieldMapping entry must look like \"profile.name\": \"entity.field\" \
                 or {\"entity\": ..., \"field\": ..., \"params\": {...}}. \
                 Run `crmsync mapping check` to validate."
                    .to_string(),
            ),
            Self::SubjectNotFound { id } => Some(format!(
                "No local subject with ID {id}. Use `crmsync subject import` to load subjects."
            )),
            Self::ContactNotFound { .. } => Some(
                "The stored remote contact id no longer resolves. \
                 Configure ownerIdField to enable identity recovery."
                    .to_string(),
            ),
            Self::ActivityNotFound { .. } => Some(
                "Run `crmsync base` first so the activity id is linked.".to_string(),
            ),
            Self::TransportFailure { .. } => Some(
                "Check that the remote url is reachable and the credentials are valid.".to_string(),
            ),
            Self::Config(_)
            | Self::RemoteRejected { .. }
            | Self::WriteFailed { .. }
            | Self::LocalSaveFailed { .. }
            | Self::Database(_)
            | Self::LockStore(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, recoverability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "recoverable": code.is_recoverable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

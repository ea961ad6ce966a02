//! Field mapping model.
//!
//! A field mapping ties one local attribute (`profile.firstname`) to one
//! remote field (`contact.first_name`). Sub-entity mappings carry
//! disambiguation params so that several local attributes can target
//! different instances of the same remote entity (home vs. work phone).
//!
//! - [`field`] - a single mapping and its local path
//! - [`collection`] - the ordered set loaded from configuration
//! - [`value`] - per-kind value normalization used for diffing

pub mod collection;
pub mod field;
pub mod value;

pub use collection::FieldMappingCollection;
pub use field::{FieldMapping, LocalPath, Params, Source};
pub use value::{loosely_equal, normalize, Comparable, FieldKind};

use thiserror::Error;

/// Errors raised while parsing mapping definitions.
///
/// Any of these aborts the whole collection load.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mapping for '{local_path}' has an invalid definition: {reason}")]
    InvalidDefinition { local_path: String, reason: String },

    #[error("mapping for '{local_path}' is missing the '{key}' key")]
    MissingKeys { local_path: String, key: &'static str },

    #[error("'{0}' is not a valid local path (expected user.*, profile.* or account.*)")]
    InvalidLocalPath(String),

    #[error("field mapping must be a JSON object keyed by local path")]
    NotAnObject,

    #[error("field mapping is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

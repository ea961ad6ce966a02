//! Per-subject eligibility.

use serde_json::json;

use super::Engine;
use crate::config::Settings;
use crate::directory::Subject;
use crate::log::{fields, EventLog};
use crate::mapping::value;

/// First check a subject failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    NotInIncludedGroup,
    InExcludedGroup,
    RetryFieldFilled,
    ContactNotAllowed,
}

impl Ineligible {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotInIncludedGroup => "not in include groups",
            Self::InExcludedGroup => "in exclude groups",
            Self::RetryFieldFilled => "retry field is not empty",
            Self::ContactNotAllowed => "contact id not in restriction list",
        }
    }
}

/// Checks in order: include groups, exclude groups, retry gate, restriction list.
///
/// # Errors
///
/// Returns the first failing check.
pub fn check(settings: &Settings, subject: &Subject) -> Result<(), Ineligible> {
    if !settings.include_groups.is_empty() && !subject.in_any_group(&settings.include_groups) {
        return Err(Ineligible::NotInIncludedGroup);
    }
    if subject.in_any_group(&settings.exclude_groups) {
        return Err(Ineligible::InExcludedGroup);
    }
    if let Some(gate) = settings.retry_gate_path() {
        if !value::is_empty(subject.attribute(&gate)) {
            return Err(Ineligible::RetryFieldFilled);
        }
    }
    if !settings.restrict_to_contact_ids.is_empty() {
        let contact_id = subject.id_at(&settings.contact_id_path());
        if !contact_id.is_some_and(|id| settings.restrict_to_contact_ids.contains(&id)) {
            return Err(Ineligible::ContactNotAllowed);
        }
    }
    Ok(())
}

impl Engine {
    /// Whether `subject` may be synced. Logs the reason when not.
    pub(crate) fn may_be_synced(&self, log: &dyn EventLog, subject: &Subject) -> bool {
        match check(&self.settings, subject) {
            Ok(()) => true,
            Err(reason) => {
                log.debug(
                    "Subject is not eligible for sync",
                    fields([
                        ("subject_id", json!(subject.id)),
                        ("reason", json!(reason.as_str())),
                    ]),
                );
                false
            }
        }
    }
}

//! Base sync: checksum, activity link and account status.

use serde_json::{json, Map, Value};

use super::batch::record_id;
use super::{Engine, SkipReason, SyncOutcome};
use crate::context::SyncContext;
use crate::directory::{AccountStatus, Subject};
use crate::error::{Error, Result};
use crate::log::{fields, EventLog};
use crate::mapping::value;
use crate::remote::{ApiParams, Entity};

/// Checksum sent for validation when none is stored.
const NO_CHECKSUM: &str = "none";

impl Engine {
    /// Reconcile checksum, activity id and account status of one subject.
    ///
    /// Re-entrant: proceeds under a lock this engine already holds.
    ///
    /// # Errors
    ///
    /// Returns `Error::ContactNotFound` when the contact cannot be found or
    /// recovered, remote errors, and `Error::LocalSaveFailed`.
    pub fn sync_base(&mut self, subject: &mut Subject) -> Result<SyncOutcome> {
        let Some(contact_id) = subject.id_at(&self.settings.contact_id_path()) else {
            return Ok(SyncOutcome::Skipped(SkipReason::NotLinked));
        };

        let mut ctx = self.begin(subject, "syncBase", None);
        ctx.set_contact_id(Some(contact_id));

        if !self.may_be_synced(&ctx, subject) {
            ctx.log_skipped(SkipReason::NotEligible.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::NotEligible));
        }
        let Some(_guard) = self.locks.enter(subject.id)? else {
            ctx.log_skipped(SkipReason::Locked.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::Locked));
        };

        match self.base_locked(&mut ctx, subject, contact_id) {
            Ok(extra) => Ok(SyncOutcome::Synced {
                changes: ctx.log_success(extra),
            }),
            Err(e) => {
                ctx.fail("syncBase failed", &e);
                Err(e)
            }
        }
    }

    fn base_locked(
        &mut self,
        ctx: &mut SyncContext,
        subject: &mut Subject,
        contact_id: i64,
    ) -> Result<Map<String, Value>> {
        let (contact, contact_id, found_by_owner_id) = self.resolve_contact(ctx, subject, contact_id)?;

        self.renew_checksum(ctx, subject, contact_id)?;

        let activity = if self.settings.activity_enabled() {
            self.apply_activity(ctx, subject, contact_id)?
        } else {
            None
        };

        if !found_by_owner_id {
            self.write_owner_id(ctx, subject, contact_id, &contact, activity.as_ref())?;
        }

        let changes_made: Vec<String> = ctx.changes().iter().map(|c| c.field.clone()).collect();
        if subject.is_dirty() {
            ctx.info(
                "Saving local subject changes",
                fields([("changes", json!(changes_made))]),
            );
            if !self.save_subject(ctx, subject)? {
                return Err(Error::LocalSaveFailed { subject_id: subject.id });
            }
        }
        Ok(fields([("changes_made", json!(changes_made))]))
    }

    /// Validate the stored checksum and replace it when the remote issues a new one.
    fn renew_checksum(&mut self, ctx: &mut SyncContext, subject: &mut Subject, contact_id: i64) -> Result<()> {
        let path = self.settings.checksum_path();
        let current = subject.attribute(&path).clone();
        let current_text = match value::scalar_text(&current) {
            s if s.trim().is_empty() => NO_CHECKSUM.to_string(),
            s => s,
        };

        if self.gateway.validate_checksum(ctx, contact_id, &current_text)? {
            return Ok(());
        }
        ctx.debug("Checksum invalid or expired - generating new one", Map::new());

        let Some(fresh) = self.gateway.get_checksum(ctx, contact_id)? else {
            ctx.warning("Remote returned no checksum", Map::new());
            return Ok(());
        };
        if fresh != current_text {
            subject.put(&path, json!(fresh));
            ctx.add_change("checksum", current, json!(fresh));
            ctx.info("Checksum updated", Map::new());
        }
        Ok(())
    }

    /// Link the subject's activity and derive the account status from it.
    fn apply_activity(
        &mut self,
        ctx: &mut SyncContext,
        subject: &mut Subject,
        contact_id: i64,
    ) -> Result<Option<Value>> {
        ctx.debug("Fetching activity from contact", Map::new());
        let activity = self.activity_for_contact(ctx, contact_id)?;
        let activity_id = activity.as_ref().and_then(|a| a.get("id")).and_then(record_id);
        ctx.set_activity_id(activity_id);

        let (Some(activity), Some(activity_id)) = (&activity, activity_id) else {
            if self.settings.strict_disable && subject.set_status(AccountStatus::Disabled) {
                ctx.add_change("account_status", json!(AccountStatus::Enabled), json!(AccountStatus::Disabled));
                ctx.warning(
                    "Account disabled - no activity found and strict mode enabled",
                    fields([("strict_disable", json!(true))]),
                );
            }
            return Ok(None);
        };

        let path = self.settings.activity_id_path();
        let current = subject.id_at(&path);
        if current != Some(activity_id) {
            subject.put(&path, json!(activity_id));
            ctx.add_change("activity_id", json!(current), json!(activity_id));
            ctx.info(
                "Activity id updated",
                fields([
                    ("old_activity_id", json!(current)),
                    ("new_activity_id", json!(activity_id)),
                ]),
            );
        }

        let status_id = activity.get("status_id").cloned().unwrap_or(Value::Null);
        let wanted = if self.settings.is_active_status(&status_id) {
            AccountStatus::Enabled
        } else {
            AccountStatus::Disabled
        };
        let old = subject.status;
        if subject.set_status(wanted) {
            ctx.add_change("account_status", json!(old), json!(wanted));
            ctx.warning(
                "Account status adjusted",
                fields([
                    ("old_status", json!(old)),
                    ("new_status", json!(wanted)),
                    ("activity_status", status_id),
                ]),
            );
        }
        Ok(Some(activity.clone()))
    }

    /// Newest activity of the configured type referencing the contact.
    ///
    /// With several candidates the first with an active status wins,
    /// otherwise the newest.
    fn activity_for_contact(&mut self, ctx: &SyncContext, contact_id: i64) -> Result<Option<Value>> {
        let query = ApiParams::new()
            .condition(json!([
                "OR",
                [
                    ["assignee_contact_id", "=", contact_id],
                    ["source_record_id", "=", contact_id],
                    ["target_contact_id", "CONTAINS", contact_id],
                ]
            ]))
            .filter("activity_type_id", "=", self.settings.activity_type_id)
            .order_by("created_date", "DESC");
        let activities = self.gateway.get(ctx, Entity::Activity, query)?;

        match activities.len() {
            0 => {
                ctx.warning(
                    "No activity found for contact",
                    fields([("contact_id", json!(contact_id))]),
                );
                Ok(None)
            }
            1 => Ok(activities.into_iter().next()),
            count => {
                ctx.warning(
                    "Multiple activities found for contact",
                    fields([("contact_id", json!(contact_id)), ("activity_count", json!(count))]),
                );
                let active = activities.iter().position(|a| {
                    a.get("status_id")
                        .is_some_and(|s| self.settings.is_active_status(s))
                });
                match active {
                    Some(index) => {
                        ctx.debug(
                            "Selecting activity by status",
                            fields([("activity_id", activities[index].get("id").cloned().unwrap_or(Value::Null))]),
                        );
                        Ok(activities.into_iter().nth(index))
                    }
                    None => {
                        ctx.warning("No activity in active statuses, taking the first", Map::new());
                        Ok(activities.into_iter().next())
                    }
                }
            }
        }
    }

    /// Store the subject id in the configured remote owner id field.
    fn write_owner_id(
        &mut self,
        ctx: &SyncContext,
        subject: &Subject,
        contact_id: i64,
        contact: &Value,
        activity: Option<&Value>,
    ) -> Result<()> {
        let Some((entity, field)) = self.settings.owner_id_target() else {
            return Ok(());
        };
        let (entity, id, record) = match (entity.as_str(), activity) {
            ("contact", _) => (Entity::Contact, contact_id, contact),
            ("activity", Some(activity)) => match activity.get("id").and_then(record_id) {
                Some(id) => (Entity::Activity, id, activity),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        if record.get(&field).and_then(record_id) == Some(subject.id) {
            return Ok(());
        }

        ctx.debug(
            "Setting subject id in remote owner id field",
            fields([("entity", json!(entity.as_str())), ("id", json!(id)), ("field", json!(field))]),
        );
        self.gateway.update(ctx, entity, id, fields([(field.as_str(), json!(subject.id))]))
    }
}

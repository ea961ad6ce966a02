//! Field sync: full diff in one direction, on-change push, and login sync.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use super::batch::{record_id, UpdateBatch};
use super::{Direction, Engine, SkipReason, SyncOutcome};
use crate::context::SyncContext;
use crate::directory::Subject;
use crate::error::{Error, Result};
use crate::log::{fields, EventLog};
use crate::mapping::{loosely_equal, normalize, Comparable, FieldKind, FieldMapping, Params, Source};
use crate::remote::Entity;

const LOCAL_TO_REMOTE: &str = "local→remote";
const REMOTE_TO_LOCAL: &str = "remote→local";

impl Engine {
    /// Reconcile every mapped field of one subject.
    ///
    /// Re-entrant: proceeds under a lock this engine already holds.
    ///
    /// # Errors
    ///
    /// Returns `Error::ContactNotFound`, `Error::ActivityNotFound` when
    /// activities are enabled but none is linked, remote errors,
    /// `Error::WriteFailed` and `Error::LocalSaveFailed`.
    pub fn sync_subject(&mut self, subject: &mut Subject, direction: Direction) -> Result<SyncOutcome> {
        let Some(contact_id) = subject.id_at(&self.settings.contact_id_path()) else {
            return Ok(SyncOutcome::Skipped(SkipReason::NotLinked));
        };

        let mut ctx = self.begin(subject, "syncSubject", Some(direction.as_str()));
        ctx.set_contact_id(Some(contact_id));

        if !self.may_be_synced(&ctx, subject) {
            ctx.log_skipped(SkipReason::NotEligible.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::NotEligible));
        }
        let Some(_guard) = self.locks.enter(subject.id)? else {
            ctx.log_skipped(SkipReason::Locked.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::Locked));
        };

        match self.full_sync_locked(&mut ctx, subject, contact_id, direction) {
            Ok(extra) => Ok(SyncOutcome::Synced {
                changes: ctx.log_success(extra),
            }),
            Err(e) => {
                ctx.fail("syncSubject failed", &e);
                Err(e)
            }
        }
    }

    fn full_sync_locked(
        &mut self,
        ctx: &mut SyncContext,
        subject: &mut Subject,
        contact_id: i64,
        direction: Direction,
    ) -> Result<Map<String, Value>> {
        let (contact, contact_id, _) = self.resolve_contact(ctx, subject, contact_id)?;

        let activity_id = self.linked_activity(ctx, subject)?;
        let activity = match activity_id {
            Some(id) => self.gateway.single(ctx, Entity::Activity, id)?,
            None => None,
        };

        let mappings = std::sync::Arc::clone(&self.mappings);
        ctx.debug(
            "Processing field mappings",
            fields([
                ("total_mappings", json!(mappings.len())),
                ("sync_direction", json!(direction.as_str())),
            ]),
        );

        let mut batch = UpdateBatch::new();
        let mut changed_fields = 0;
        let mut skipped_readonly = 0;
        let mut local_changed = false;

        for mapping in mappings.iter() {
            let path = mapping.local_path();
            let kind = self.directory.field_kind(path);
            let local = self.directory.get_attribute(subject, path);
            let remote = self.remote_value(ctx, &contact, contact_id, activity.as_ref(), mapping, &local, kind)?;

            if loosely_equal(&local, &remote, kind) {
                continue;
            }
            changed_fields += 1;

            if direction.writes_remote() {
                let outgoing = outgoing_value(&local, kind);
                ctx.log_field_change(&path.to_string(), remote, outgoing.clone(), LOCAL_TO_REMOTE);
                batch.stage(mapping, outgoing);
            } else if path.is_read_only() {
                ctx.debug(
                    "Skipping read-only local field",
                    fields([("field", json!(path.to_string()))]),
                );
                skipped_readonly += 1;
            } else if self.directory.set_attribute(subject, path, remote.clone()) {
                ctx.log_field_change(&path.to_string(), local, remote, REMOTE_TO_LOCAL);
                local_changed = true;
            } else {
                ctx.log_error(
                    "Failed to set local value",
                    None,
                    fields([("field", json!(path.to_string()))]),
                );
            }
        }

        let mut saved = true;
        if local_changed {
            ctx.info("Saving local subject changes", Map::new());
            saved = self.save_subject(ctx, subject)?;
            if !saved {
                ctx.log_error("Failed to save local subject", None, Map::new());
            }
        }

        let remote_updated = !batch.is_empty();
        if remote_updated {
            ctx.info(
                "Executing remote updates",
                fields([
                    ("entities", json!(batch.entities())),
                    ("update_count", json!(batch.write_count())),
                ]),
            );
            batch.execute(&mut self.gateway, ctx, contact_id, activity_id)?;
        }

        if !saved {
            return Err(Error::LocalSaveFailed { subject_id: subject.id });
        }
        Ok(fields([
            ("processed_fields", json!(mappings.len())),
            ("changed_fields", json!(changed_fields)),
            ("skipped_readonly_fields", json!(skipped_readonly)),
            ("local_saved", json!(local_changed)),
            ("remote_updated", json!(remote_updated)),
        ]))
    }

    /// Push changed local fields, with their siblings, to the remote CRM.
    ///
    /// `changed` maps field names (bare or full) to their previous values.
    /// Strict locking: any existing lock on the subject skips the run, which
    /// also stops a save from re-triggering this routine.
    ///
    /// # Errors
    ///
    /// Returns `Error::SubjectNotFound`, `Error::ContactNotFound`,
    /// `Error::ActivityNotFound`, remote errors and `Error::WriteFailed`.
    pub fn on_change(
        &mut self,
        subject_id: i64,
        source: Source,
        changed: &Map<String, Value>,
    ) -> Result<SyncOutcome> {
        if !self.settings.enable_on_change_sync {
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        }
        if changed.is_empty() {
            return Ok(SyncOutcome::Skipped(SkipReason::NoChanges));
        }
        let mut subject = self.load_subject(subject_id)?;

        let mut ctx = self.begin(&subject, "onChange", Some(source.as_str()));
        ctx.add_metadata("changed_fields", json!(changed.keys().collect::<Vec<_>>()));

        if !self.may_be_synced(&ctx, &subject) {
            ctx.log_skipped(SkipReason::NotEligible.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::NotEligible));
        }
        let Some(_guard) = self.locks.try_acquire(subject.id)? else {
            ctx.log_skipped(SkipReason::Locked.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::Locked));
        };
        let Some(contact_id) = subject.id_at(&self.settings.contact_id_path()) else {
            ctx.log_error("Remote contact id not found on subject", None, Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::NotLinked));
        };
        ctx.set_contact_id(Some(contact_id));

        match self.on_change_locked(&mut ctx, &mut subject, contact_id, source, changed) {
            Ok(extra) => Ok(SyncOutcome::Synced {
                changes: ctx.log_success(extra),
            }),
            Err(e) => {
                ctx.fail("onChange failed", &e);
                Err(e)
            }
        }
    }

    fn on_change_locked(
        &mut self,
        ctx: &mut SyncContext,
        subject: &mut Subject,
        contact_id: i64,
        source: Source,
        changed: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let (_, mut contact_id, _) = self.resolve_contact(ctx, subject, contact_id)?;

        if self.settings.enable_base_sync {
            ctx.debug("Running base sync", Map::new());
            self.sync_base(subject)?;
            if let Some(id) = subject.id_at(&self.settings.contact_id_path()) {
                contact_id = id;
            }
        }
        let activity_id = self.linked_activity(ctx, subject)?;

        let mappings = std::sync::Arc::clone(&self.mappings);
        let to_sync = fields_with_siblings(&mappings, source, changed);
        ctx.debug(
            "Processing field mappings",
            fields([
                ("fields_to_sync", json!(to_sync)),
                ("total_mappings", json!(mappings.len())),
            ]),
        );

        let mut batch = UpdateBatch::new();
        let mut processed = 0;
        let mut skipped = 0;
        for mapping in mappings.iter() {
            if !mapping.matches_source(source) || !to_sync.contains(mapping.bare_name()) {
                continue;
            }
            processed += 1;

            let path = mapping.local_path();
            let kind = self.directory.field_kind(path);
            let local = self.directory.get_attribute(subject, path);

            if mapping.is_sub_entity() {
                if let Some(existing_id) = self.value_holder(ctx, contact_id, mapping, &local, kind)? {
                    ctx.debug(
                        "Skipping duplicate sub-entity",
                        fields([
                            ("entity", json!(mapping.remote_entity())),
                            ("field", json!(mapping.remote_field())),
                            ("existing_id", json!(existing_id)),
                        ]),
                    );
                    skipped += 1;
                    continue;
                }
            }

            let previous = changed
                .get(mapping.bare_name())
                .or_else(|| changed.get(&path.to_string()))
                .cloned()
                .unwrap_or(Value::Null);
            let outgoing = outgoing_value(&local, kind);
            ctx.log_field_change(&path.to_string(), previous, outgoing.clone(), LOCAL_TO_REMOTE);
            batch.stage(mapping, outgoing);
        }

        let updates_sent = !batch.is_empty();
        if updates_sent {
            ctx.info(
                "Executing remote updates",
                fields([
                    ("entities", json!(batch.entities())),
                    ("update_count", json!(batch.write_count())),
                ]),
            );
            batch.execute(&mut self.gateway, ctx, contact_id, activity_id)?;
        } else {
            ctx.debug("No updates needed", Map::new());
        }

        Ok(fields([
            ("processed_fields", json!(processed)),
            ("skipped_fields", json!(skipped)),
            ("updates_sent", json!(updates_sent)),
        ]))
    }

    /// Base sync on login, then a remote→local full sync when `autoFullSync` is set.
    ///
    /// Strict locking like [`on_change`](Self::on_change).
    ///
    /// # Errors
    ///
    /// Returns `Error::SubjectNotFound` and any error of the inner syncs.
    pub fn on_login(&mut self, subject_id: i64) -> Result<SyncOutcome> {
        if !self.settings.enable_on_login_sync {
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        }
        let mut subject = self.load_subject(subject_id)?;

        let mut ctx = self.begin(&subject, "onLogin", None);
        if !self.may_be_synced(&ctx, &subject) {
            ctx.log_skipped(SkipReason::NotEligible.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::NotEligible));
        }
        let Some(_guard) = self.locks.try_acquire(subject.id)? else {
            ctx.log_skipped(SkipReason::Locked.as_str(), Map::new());
            return Ok(SyncOutcome::Skipped(SkipReason::Locked));
        };

        let result = self.sync_base(&mut subject).and_then(|base| {
            let full = if self.settings.auto_full_sync {
                Some(self.sync_subject(&mut subject, Direction::FromRemote)?)
            } else {
                None
            };
            Ok((base, full))
        });

        match result {
            Ok((base, full)) => {
                for change in base.changes().iter().chain(full.iter().flat_map(SyncOutcome::changes)) {
                    ctx.add_change(&change.field, change.old.clone(), change.new.clone());
                }
                let extra = fields([
                    ("base", json!(base.skip_reason().map_or("synced", |r| r.as_str()))),
                    ("full", json!(full.map(|f| f.skip_reason().map_or("synced", |r| r.as_str())))),
                ]);
                Ok(SyncOutcome::Synced {
                    changes: ctx.log_success(extra),
                })
            }
            Err(e) => {
                ctx.fail("onLogin failed", &e);
                Err(e)
            }
        }
    }

    /// Stored activity id, required when activities are enabled.
    fn linked_activity(&self, ctx: &mut SyncContext, subject: &Subject) -> Result<Option<i64>> {
        let activity_id = subject.id_at(&self.settings.activity_id_path());
        ctx.set_activity_id(activity_id);
        if self.settings.activity_enabled() && activity_id.is_none() {
            ctx.log_error(
                "Activity required but not found",
                None,
                fields([("required_activity_type_id", json!(self.settings.activity_type_id))]),
            );
            return Err(Error::ActivityNotFound { subject_id: subject.id });
        }
        Ok(activity_id)
    }

    /// Remote value for `mapping`.
    ///
    /// A sub-entity value that already exists on another instance of the
    /// entity counts as represented and returns the local value unchanged.
    #[allow(clippy::too_many_arguments)]
    fn remote_value(
        &mut self,
        ctx: &SyncContext,
        contact: &Value,
        contact_id: i64,
        activity: Option<&Value>,
        mapping: &FieldMapping,
        local: &Value,
        kind: FieldKind,
    ) -> Result<Value> {
        let field = mapping.remote_field();
        if mapping.is_activity() {
            return Ok(activity.and_then(|a| a.get(field)).cloned().unwrap_or(Value::Null));
        }
        if !mapping.is_sub_entity() {
            return Ok(contact.get(field).cloned().unwrap_or(Value::Null));
        }

        if let Some(holder) = self.value_holder(ctx, contact_id, mapping, local, kind)? {
            ctx.debug(
                "Local value found on another sub-entity instance",
                fields([
                    ("entity", json!(mapping.remote_entity())),
                    ("field", json!(field)),
                    ("existing_id", json!(holder)),
                ]),
            );
            return Ok(local.clone());
        }
        let entity = self.sub_entity_of(ctx, mapping)?;
        let row = self.gateway.sub_entity(ctx, entity, contact_id, mapping.params())?;
        Ok(row.and_then(|r| r.get(field).cloned()).unwrap_or(Value::Null))
    }

    /// Id of a sub-record of the contact holding `local` under other params.
    ///
    /// The record addressed by the mapping's own params is never a holder.
    fn value_holder(
        &mut self,
        ctx: &SyncContext,
        contact_id: i64,
        mapping: &FieldMapping,
        local: &Value,
        kind: FieldKind,
    ) -> Result<Option<i64>> {
        let wanted = normalize(local, kind);
        if wanted == Comparable::Empty {
            return Ok(None);
        }
        let entity = self.sub_entity_of(ctx, mapping)?;
        let rows = self.gateway.sub_entities(ctx, entity, contact_id, &Params::new())?;
        Ok(rows
            .iter()
            .filter(|row| !matches_params(row, mapping.params()))
            .find(|row| {
                row.get(mapping.remote_field())
                    .is_some_and(|v| normalize(v, kind) == wanted)
            })
            .and_then(|row| row.get("id"))
            .and_then(record_id))
    }

    fn sub_entity_of(&self, ctx: &SyncContext, mapping: &FieldMapping) -> Result<Entity> {
        Entity::parse(mapping.remote_entity()).ok_or_else(|| {
            ctx.error(
                "Invalid remote entity",
                fields([("requested_entity", json!(mapping.remote_entity()))]),
            );
            Error::RemoteRejected {
                entity: mapping.remote_entity().to_string(),
                action: "get".to_string(),
                message: "entity is not on the allow-list".to_string(),
            }
        })
    }
}

/// Bare names of the changed fields of `source` plus their siblings.
fn fields_with_siblings(
    mappings: &crate::mapping::FieldMappingCollection,
    source: Source,
    changed: &Map<String, Value>,
) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for name in changed.keys() {
        let full = if name.contains('.') {
            name.clone()
        } else {
            format!("{source}.{name}")
        };
        if let Some((_, bare)) = full.split_once('.') {
            names.insert(bare.to_string());
        }
        for sibling in mappings.siblings_of_local_path(&full, false) {
            names.insert(sibling.bare_name().to_string());
        }
    }
    names
}

/// Value sent to the remote side. Lists go out as arrays.
fn outgoing_value(local: &Value, kind: FieldKind) -> Value {
    match (kind, normalize(local, kind)) {
        (FieldKind::List, Comparable::List(items)) => json!(items),
        (FieldKind::List, _) => json!([]),
        (FieldKind::Text, _) => local.clone(),
    }
}

/// Whether `row` is the sub-record addressed by `params`.
fn matches_params(row: &Value, params: &Params) -> bool {
    params.iter().all(|(key, wanted)| {
        row.get(key)
            .is_some_and(|actual| loosely_equal(actual, wanted, FieldKind::Text))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldMappingCollection;

    #[test]
    fn test_changed_fields_pull_in_siblings() {
        let mappings = FieldMappingCollection::load(
            r#"{
                "profile.street": {"entity": "address", "field": "street_address", "params": {"location_type_id": 1}},
                "profile.city": {"entity": "address", "field": "city", "params": {"location_type_id": 1}},
                "profile.firstname": "contact.first_name"
            }"#,
        )
        .unwrap();
        let changed = fields([("street", json!("Old St 1"))]);
        let names = fields_with_siblings(&mappings, Source::Profile, &changed);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["city", "street"]);
    }

    #[test]
    fn test_matches_params() {
        let params: Params = [("location_type_id".to_string(), json!(1))].into_iter().collect();
        assert!(matches_params(&json!({"id": 4, "location_type_id": "1"}), &params));
        assert!(!matches_params(&json!({"id": 5, "location_type_id": 2}), &params));
        assert!(!matches_params(&json!({"id": 6}), &params));
        assert!(matches_params(&json!({"id": 7}), &Params::new()));
    }

    #[test]
    fn test_outgoing_list_value() {
        assert_eq!(outgoing_value(&json!("b\na\n\nb"), FieldKind::List), json!(["a", "b"]));
        assert_eq!(outgoing_value(&Value::Null, FieldKind::List), json!([]));
        assert_eq!(outgoing_value(&json!(" x "), FieldKind::Text), json!(" x "));
    }
}

//! Identity recovery.
//!
//! Remote contacts get merged and deduplicated, so a stored contact id can
//! stop resolving. When `ownerIdField` names a remote field holding the
//! local subject id, the contact is searched through it:
//!
//! - `contact.<field>`: the contact carrying the subject id
//! - `activity.<field>`: activities carrying the subject id, their linked
//!   contacts, then the first of those with an e-mail equal to the subject's

use serde_json::{json, Map, Value};

use super::batch::record_id;
use super::Engine;
use crate::context::SyncContext;
use crate::directory::Subject;
use crate::error::{Error, Result};
use crate::log::{fields, EventLog};
use crate::remote::{ApiParams, Entity};

impl Engine {
    /// Fetch the subject's remote contact, recovering it if the stored id is stale.
    ///
    /// On recovery the new contact id is stored and the subject saved.
    /// Returns the contact, its id, and whether it was found through the
    /// owner id field.
    pub(crate) fn resolve_contact(
        &mut self,
        ctx: &mut SyncContext,
        subject: &mut Subject,
        contact_id: i64,
    ) -> Result<(Value, i64, bool)> {
        ctx.debug("Fetching remote contact", Map::new());
        if let Some(contact) = self.gateway.single(ctx, Entity::Contact, contact_id)? {
            return Ok((contact, contact_id, false));
        }

        if self.settings.owner_id_target().is_none() {
            return Err(Error::ContactNotFound {
                subject_id: subject.id,
                contact_id,
            });
        }

        ctx.warning(
            "Contact not found - attempting recovery by owner id",
            fields([("original_contact_id", json!(contact_id))]),
        );
        let recovered = self.recover_contact(ctx, subject)?;
        let Some((contact, new_id)) = recovered.and_then(|c| {
            let id = c.get("id").and_then(record_id)?;
            Some((c, id))
        }) else {
            return Err(Error::ContactNotFound {
                subject_id: subject.id,
                contact_id,
            });
        };

        subject.put(&self.settings.contact_id_path(), json!(new_id));
        if !self.save_subject(ctx, subject)? {
            return Err(Error::LocalSaveFailed { subject_id: subject.id });
        }
        ctx.set_contact_id(Some(new_id));
        ctx.info(
            "Contact id updated after recovery",
            fields([
                ("old_contact_id", json!(contact_id)),
                ("new_contact_id", json!(new_id)),
            ]),
        );
        Ok((contact, new_id, true))
    }

    /// Search the contact through the owner id field.
    fn recover_contact(&mut self, ctx: &SyncContext, subject: &Subject) -> Result<Option<Value>> {
        let Some((entity, field)) = self.settings.owner_id_target() else {
            return Ok(None);
        };
        match entity.as_str() {
            "contact" => {
                let query = ApiParams::new().filter(&field, "=", subject.id).limit(1);
                Ok(self.gateway.get(ctx, Entity::Contact, query)?.into_iter().next())
            }
            "activity" => {
                let query = ApiParams::new().filter(&field, "=", subject.id);
                let activities = self.gateway.get(ctx, Entity::Activity, query)?;
                if activities.is_empty() {
                    return Ok(None);
                }
                self.contact_by_activities(ctx, subject, &activities)
            }
            other => {
                ctx.warning(
                    "Owner id field is on an entity that cannot identify a contact",
                    fields([("entity", json!(other))]),
                );
                Ok(None)
            }
        }
    }

    /// Contacts linked to `activities` whose e-mail matches the subject.
    ///
    /// Several matching contacts are possible; the first wins.
    fn contact_by_activities(
        &mut self,
        ctx: &SyncContext,
        subject: &Subject,
        activities: &[Value],
    ) -> Result<Option<Value>> {
        let Some(email) = subject.email() else {
            ctx.warning("Subject has no e-mail to match activity contacts", Map::new());
            return Ok(None);
        };
        ctx.debug(
            "Searching contact by activities",
            fields([("email", json!(email)), ("activity_count", json!(activities.len()))]),
        );

        let mut contact_ids: Vec<i64> = Vec::new();
        for activity_id in activities.iter().filter_map(|a| a.get("id").and_then(record_id)) {
            let links = self.gateway.get(
                ctx,
                Entity::ActivityContact,
                ApiParams::new().filter("activity_id", "=", activity_id),
            )?;
            for id in links.iter().filter_map(|l| l.get("contact_id").and_then(record_id)) {
                if !contact_ids.contains(&id) {
                    contact_ids.push(id);
                }
            }
        }
        if contact_ids.is_empty() {
            ctx.error("No contact ids found in activities", Map::new());
            return Ok(None);
        }

        let emails = self.gateway.get(
            ctx,
            Entity::Email,
            ApiParams::new()
                .filter("contact_id", "IN", json!(contact_ids))
                .filter("email", "=", email),
        )?;
        ctx.debug(
            "Found e-mail records matching subject in activities",
            fields([("match_count", json!(emails.len()))]),
        );

        let Some(contact_id) = emails.first().and_then(|e| e.get("contact_id")).and_then(record_id) else {
            ctx.error("No contact found by activities", Map::new());
            return Ok(None);
        };
        self.gateway.single(ctx, Entity::Contact, contact_id)
    }
}

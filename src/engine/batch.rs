//! Staged remote writes.
//!
//! Fields staged during a diff are grouped so that each remote record gets
//! one call: all contact fields in one update, all activity fields in one
//! update, and sub-entity fields grouped by `(entity, params)` into one
//! update of the matching sub-record, or one create when none exists.
//!
//! Writes run contact, activity, then sub-entity groups in the order they
//! were first staged. The first failure stops the rest; earlier writes stay.

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::log::{fields, EventLog};
use crate::mapping::{FieldMapping, Params};
use crate::remote::{Entity, RemoteGateway};

/// Fields destined for one sub-record.
#[derive(Debug, Clone, PartialEq)]
pub struct SubEntityWrite {
    pub entity: String,
    pub params: Params,
    pub values: Map<String, Value>,
}

/// Remote writes collected for one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    contact: Map<String, Value>,
    activity: Map<String, Value>,
    sub_entities: Vec<SubEntityWrite>,
}

impl UpdateBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` for the remote field of `mapping`.
    pub fn stage(&mut self, mapping: &FieldMapping, value: Value) {
        let field = mapping.remote_field().to_string();
        if mapping.is_contact() {
            self.contact.insert(field, value);
        } else if mapping.is_activity() {
            self.activity.insert(field, value);
        } else if let Some(group) = self
            .sub_entities
            .iter_mut()
            .find(|g| g.entity == mapping.remote_entity() && g.params == *mapping.params())
        {
            group.values.insert(field, value);
        } else {
            self.sub_entities.push(SubEntityWrite {
                entity: mapping.remote_entity().to_string(),
                params: mapping.params().clone(),
                values: Map::from_iter([(field, value)]),
            });
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contact.is_empty() && self.activity.is_empty() && self.sub_entities.is_empty()
    }

    /// Number of remote records that will be written.
    #[must_use]
    pub fn write_count(&self) -> usize {
        usize::from(!self.contact.is_empty()) + usize::from(!self.activity.is_empty()) + self.sub_entities.len()
    }

    /// Entity names in write order.
    #[must_use]
    pub fn entities(&self) -> Vec<&str> {
        let mut entities = Vec::new();
        if !self.contact.is_empty() {
            entities.push("contact");
        }
        if !self.activity.is_empty() {
            entities.push("activity");
        }
        entities.extend(self.sub_entities.iter().map(|g| g.entity.as_str()));
        entities
    }

    #[must_use]
    pub fn contact_values(&self) -> &Map<String, Value> {
        &self.contact
    }

    #[must_use]
    pub fn activity_values(&self) -> &Map<String, Value> {
        &self.activity
    }

    #[must_use]
    pub fn sub_entity_writes(&self) -> &[SubEntityWrite] {
        &self.sub_entities
    }

    /// Send all staged writes.
    ///
    /// # Errors
    ///
    /// Returns `Error::WriteFailed` for the first write that fails; later
    /// writes are not attempted.
    pub fn execute(
        self,
        gateway: &mut RemoteGateway,
        log: &dyn EventLog,
        contact_id: i64,
        activity_id: Option<i64>,
    ) -> Result<()> {
        if !self.contact.is_empty() {
            gateway
                .update(log, Entity::Contact, contact_id, self.contact)
                .map_err(|e| write_failed(log, "contact", e))?;
        }

        if !self.activity.is_empty() {
            let activity_id = activity_id
                .ok_or_else(|| Error::InvalidArgument("an activity id is required to update activity fields".into()))
                .map_err(|e| write_failed(log, "activity", e))?;
            gateway
                .update(log, Entity::Activity, activity_id, self.activity)
                .map_err(|e| write_failed(log, "activity", e))?;
        }

        for group in self.sub_entities {
            let name = group.entity.clone();
            write_sub_entity(gateway, log, contact_id, group).map_err(|e| write_failed(log, &name, e))?;
        }
        Ok(())
    }
}

/// Update the sub-record matching the params, or create it.
fn write_sub_entity(
    gateway: &mut RemoteGateway,
    log: &dyn EventLog,
    contact_id: i64,
    group: SubEntityWrite,
) -> Result<()> {
    let entity = Entity::parse(&group.entity).ok_or_else(|| Error::RemoteRejected {
        entity: group.entity.clone(),
        action: "update".to_string(),
        message: "entity is not on the allow-list".to_string(),
    })?;

    let existing = gateway.sub_entity(log, entity, contact_id, &group.params)?;
    if let Some(id) = existing.as_ref().and_then(|row| row.get("id")).and_then(record_id) {
        return gateway.update(log, entity, id, group.values);
    }

    let mut values = group.values;
    values.insert("contact_id".to_string(), json!(contact_id));
    values.extend(group.params);
    gateway.create(log, entity, values)
}

/// Ids come back as numbers or numeric strings.
pub(crate) fn record_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|id| *id != 0)
}

fn write_failed(log: &dyn EventLog, entity: &str, cause: Error) -> Error {
    log.error(
        "Remote write failed, skipping remaining writes",
        fields([
            ("entity", json!(entity)),
            ("error", json!(cause.to_string())),
        ]),
    );
    Error::WriteFailed {
        entity: entity.to_string(),
        source: Box::new(cause),
    }
}

//! Request parameters for remote API calls.

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Parameters of one API call, serialized as the `params` form field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiParams {
    #[serde(rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    #[serde(rename = "orderBy", skip_serializing_if = "Map::is_empty")]
    pub order_by: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub values: Map<String, Value>,
    /// Action-specific top-level keys (`contactId`, `checksum`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `[field, op, value]` condition.
    #[must_use]
    pub fn filter(mut self, field: &str, op: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(json!([field, op, value.into()]));
        self
    }

    /// Add a raw condition such as an `OR` group.
    #[must_use]
    pub fn condition(mut self, condition: Value) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: &str, direction: &str) -> Self {
        self.order_by.insert(field.to_string(), json!(direction));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn values(mut self, values: Map<String, Value>) -> Self {
        self.values = values;
        self
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Whether a top-level condition already filters on `field`.
    #[must_use]
    pub fn filters_on(&self, field: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.get(0).and_then(Value::as_str) == Some(field))
    }

    /// Number of top-level keys that will be sent.
    #[must_use]
    pub fn key_count(&self) -> usize {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_object().map(Map::len))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_remote_keys() {
        let params = ApiParams::new()
            .filter("id", "=", 5)
            .order_by("created_date", "DESC")
            .limit(1);
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["where"], json!([["id", "=", 5]]));
        assert_eq!(json["orderBy"]["created_date"], "DESC");
        assert_eq!(json["limit"], 1);
        assert!(json.get("select").is_none());
        assert!(json.get("values").is_none());
        assert_eq!(params.key_count(), 3);
    }

    #[test]
    fn test_extra_keys_are_flattened() {
        let params = ApiParams::new().with("contactId", 9).with("checkPermissions", true);
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, json!({"contactId": 9, "checkPermissions": true}));
    }

    #[test]
    fn test_filters_on() {
        let params = ApiParams::new()
            .filter("is_deleted", "=", true)
            .condition(json!(["OR", [["a", "=", 1]]]));
        assert!(params.filters_on("is_deleted"));
        assert!(!params.filters_on("a"));
    }
}

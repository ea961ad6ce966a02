//! Sync settings.
//!
//! Settings are read once per engine from a JSON file (camelCase keys, every
//! key optional), then overridden from the environment. They are read-only
//! afterwards.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::mapping::{FieldMappingCollection, LocalPath, Source};

/// Settings snapshot consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Base url of the remote CRM.
    pub url: String,
    pub secret: String,
    pub site_key: String,

    /// Local attribute holding the remote contact id.
    pub contact_id_field: String,
    /// Local attribute holding the remote activity id.
    pub activity_id_field: String,
    /// Remote activity type that links a contact to this directory. 0 disables activities.
    pub activity_type_id: i64,
    /// Remote `entity.field` that stores the local subject id.
    pub owner_id_field: String,
    pub checksum_field: String,

    pub enable_base_sync: bool,
    pub enable_on_change_sync: bool,
    pub enable_on_login_sync: bool,
    pub auto_full_sync: bool,
    pub dry_run: bool,
    pub strict_disable: bool,

    pub limit: u32,
    pub offset: u32,

    /// Only subjects linked to these remote contacts are synced.
    #[serde(deserialize_with = "id_list")]
    pub restrict_to_contact_ids: Vec<i64>,
    /// Only subjects whose attribute is still empty are synced.
    pub retry_on_missing_field: String,

    #[serde(deserialize_with = "mapping_definition")]
    pub field_mapping: Value,

    #[serde(deserialize_with = "name_list")]
    pub contact_custom_field_groups: Vec<String>,
    #[serde(deserialize_with = "name_list")]
    pub activity_custom_field_groups: Vec<String>,

    #[serde(deserialize_with = "id_list")]
    pub include_groups: Vec<i64>,
    #[serde(deserialize_with = "id_list")]
    pub exclude_groups: Vec<i64>,

    pub lock_ttl_secs: u64,
    pub active_activity_statuses: Vec<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: String::new(),
            site_key: String::new(),
            contact_id_field: "crm_contact_id".to_string(),
            activity_id_field: "crm_activity_id".to_string(),
            activity_type_id: 0,
            owner_id_field: String::new(),
            checksum_field: "crm_checksum".to_string(),
            enable_base_sync: true,
            enable_on_change_sync: false,
            enable_on_login_sync: false,
            auto_full_sync: false,
            dry_run: false,
            strict_disable: false,
            limit: 0,
            offset: 0,
            restrict_to_contact_ids: Vec::new(),
            retry_on_missing_field: String::new(),
            field_mapping: Value::Object(serde_json::Map::new()),
            contact_custom_field_groups: Vec::new(),
            activity_custom_field_groups: Vec::new(),
            include_groups: Vec::new(),
            exclude_groups: Vec::new(),
            lock_ttl_secs: 30,
            active_activity_statuses: vec![9],
        }
    }
}

/// Remote connection details, present only when fully configured.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub url: String,
    pub secret: String,
    pub site_key: String,
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("url", &self.url)
            .field("secret", &"***")
            .field("site_key", &"***")
            .finish()
    }
}

impl Settings {
    /// Load settings from `path` and apply environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
                Self::from_json(&content)?
            }
            _ => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Parse settings JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the JSON does not describe settings.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    /// Apply `CRMSYNC_*` overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("CRMSYNC_URL") {
            self.url = url;
        }
        if let Some(secret) = non_empty("CRMSYNC_SECRET") {
            self.secret = secret;
        }
        if let Some(site_key) = non_empty("CRMSYNC_SITE_KEY") {
            self.site_key = site_key;
        }
        if let Some(dry_run) = non_empty("CRMSYNC_DRY_RUN") {
            self.dry_run = !matches!(dry_run.to_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
    }

    /// Check that the remote connection is configured.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing or invalid value.
    pub fn validate_remote(&self) -> Result<RemoteEndpoint> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("remote url is not configured".into()));
        }
        if self.secret.is_empty() {
            return Err(Error::Config("remote secret is not configured".into()));
        }
        if self.site_key.is_empty() {
            return Err(Error::Config("remote site key is not configured".into()));
        }
        url::Url::parse(self.url.trim())
            .map_err(|e| Error::Config(format!("remote url '{}' is invalid: {e}", self.url)))?;

        Ok(RemoteEndpoint {
            url: self.url.trim().to_string(),
            secret: self.secret.clone(),
            site_key: self.site_key.clone(),
        })
    }

    /// Parse the configured field mapping.
    ///
    /// # Errors
    ///
    /// Returns `Error::Mapping` if any entry is invalid.
    pub fn field_mappings(&self) -> Result<FieldMappingCollection> {
        let collection = match &self.field_mapping {
            Value::String(s) => FieldMappingCollection::load(s)?,
            other => FieldMappingCollection::from_value(other)?,
        };
        Ok(collection)
    }

    /// Activities are linked only when a type and an id field are configured.
    #[must_use]
    pub fn activity_enabled(&self) -> bool {
        self.activity_type_id > 0 && !self.activity_id_field.is_empty()
    }

    #[must_use]
    pub fn contact_id_path(&self) -> LocalPath {
        profile_path(&self.contact_id_field)
    }

    #[must_use]
    pub fn activity_id_path(&self) -> LocalPath {
        profile_path(&self.activity_id_field)
    }

    #[must_use]
    pub fn checksum_path(&self) -> LocalPath {
        profile_path(&self.checksum_field)
    }

    #[must_use]
    pub fn retry_gate_path(&self) -> Option<LocalPath> {
        (!self.retry_on_missing_field.is_empty()).then(|| profile_path(&self.retry_on_missing_field))
    }

    /// Remote entity and field holding the local subject id.
    #[must_use]
    pub fn owner_id_target(&self) -> Option<(String, String)> {
        self.owner_id_field
            .split_once('.')
            .filter(|(e, f)| !e.is_empty() && !f.is_empty())
            .map(|(e, f)| (e.to_lowercase(), f.to_string()))
    }

    #[must_use]
    pub fn is_active_status(&self, status: &Value) -> bool {
        let status = match status {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        status.is_some_and(|s| self.active_activity_statuses.contains(&s))
    }
}

/// Attribute names without a source prefix live on the profile.
fn profile_path(name: &str) -> LocalPath {
    name.parse()
        .unwrap_or_else(|_| LocalPath::new(Source::Profile, name))
}

/// Accepts `[1, "2"]` or a string of ids separated by anything that is not a digit.
fn id_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect(),
        Value::String(s) => s
            .split(|c: char| !c.is_ascii_digit())
            .filter_map(|part| part.parse().ok())
            .collect(),
        Value::Number(n) => n.as_i64().into_iter().collect(),
        _ => Vec::new(),
    })
}

/// Accepts `["a", "b"]` or `"a, b"`.
fn name_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let names: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

/// Accepts an object, a JSON string, or null.
fn mapping_definition<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let s = Settings::from_json("{}").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.lock_ttl_secs, 30);
        assert_eq!(s.active_activity_statuses, vec![9]);
        assert!(s.enable_base_sync);
        assert!(!s.activity_enabled());
        assert_eq!(s.contact_id_path().to_string(), "profile.crm_contact_id");
    }

    #[test]
    fn test_comma_lists_and_restriction_list() {
        let s = Settings::from_json(
            r#"{
                "includeGroups": "1, 2,,3",
                "excludeGroups": [4, "5"],
                "restrictToContactIds": "10;11 12\n13",
                "contactCustomFieldGroups": " crm_profile , extra ",
                "activityCustomFieldGroups": ["membership"]
            }"#,
        )
        .unwrap();
        assert_eq!(s.include_groups, vec![1, 2, 3]);
        assert_eq!(s.exclude_groups, vec![4, 5]);
        assert_eq!(s.restrict_to_contact_ids, vec![10, 11, 12, 13]);
        assert_eq!(s.contact_custom_field_groups, vec!["crm_profile", "extra"]);
        assert_eq!(s.activity_custom_field_groups, vec!["membership"]);
    }

    #[test]
    fn test_field_mapping_as_string_or_object() {
        let as_string = Settings::from_json(
            r#"{"fieldMapping": "{\"profile.firstname\": \"contact.first_name\"}"}"#,
        )
        .unwrap();
        assert_eq!(as_string.field_mappings().unwrap().len(), 1);

        let as_object = Settings::from_json(
            r#"{"fieldMapping": {"profile.city": {"entity": "address", "field": "city"}}}"#,
        )
        .unwrap();
        assert_eq!(as_object.field_mappings().unwrap().len(), 1);

        let broken = Settings::from_json(r#"{"fieldMapping": {"profile.city": 5}}"#).unwrap();
        assert!(matches!(broken.field_mappings(), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_validate_remote() {
        let mut s = Settings::default();
        assert!(matches!(s.validate_remote(), Err(Error::Config(msg)) if msg.contains("url")));

        s.url = "https://crm.example.org".into();
        s.secret = "secret".into();
        assert!(matches!(s.validate_remote(), Err(Error::Config(msg)) if msg.contains("site key")));

        s.site_key = "key".into();
        let endpoint = s.validate_remote().unwrap();
        assert_eq!(endpoint.url, "https://crm.example.org");
        assert!(!format!("{endpoint:?}").contains("\"secret\""));

        s.url = "not a url".into();
        assert!(matches!(s.validate_remote(), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CRMSYNC_URL", "https://env.example.org"),
            ("CRMSYNC_SECRET", ""),
            ("CRMSYNC_DRY_RUN", "true"),
        ]
        .into_iter()
        .collect();
        let mut s = Settings {
            secret: "from-file".into(),
            ..Settings::default()
        };
        s.apply_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(s.url, "https://env.example.org");
        assert_eq!(s.secret, "from-file");
        assert!(s.dry_run);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"activityTypeId": 55, "ownerIdField": "Contact.external_id"}"#).unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.activity_type_id, 55);
        assert!(s.activity_enabled());
        assert_eq!(
            s.owner_id_target(),
            Some(("contact".to_string(), "external_id".to_string()))
        );

        let missing = Settings::load(Some(&dir.path().join("missing.json"))).unwrap();
        assert_eq!(missing.activity_type_id, 0);

        fs::write(&path, "not json").unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_active_status() {
        let s = Settings::default();
        assert!(s.is_active_status(&json!(9)));
        assert!(s.is_active_status(&json!("9")));
        assert!(!s.is_active_status(&json!(2)));
        assert!(!s.is_active_status(&Value::Null));
    }
}

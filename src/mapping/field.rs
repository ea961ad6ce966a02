//! A single local-to-remote field mapping.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::MappingError;

/// Disambiguation params of a sub-entity mapping.
///
/// Ordered so that equality and hashing are by value.
pub type Params = BTreeMap<String, Value>;

/// Remote entities that are not sub-entities.
const PRIMARY_ENTITIES: [&str; 2] = ["contact", "activity"];

/// Namespace of a local attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    User,
    Profile,
    Account,
}

impl Source {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Profile => "profile",
            Self::Account => "account",
        }
    }
}

impl FromStr for Source {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "profile" => Ok(Self::Profile),
            "account" => Ok(Self::Account),
            other => Err(MappingError::InvalidLocalPath(other.to_string())),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A two-part local attribute path such as `profile.firstname`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalPath {
    source: Source,
    name: String,
}

impl LocalPath {
    #[must_use]
    pub fn new(source: Source, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    /// Attribute name without the source prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the local directory forbids writing remote values here.
    ///
    /// All `user.*` attributes are identity-linked. A few `account.*`
    /// attributes are owned by the authentication layer.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        match self.source {
            Source::User => true,
            Source::Account => matches!(
                self.name.as_str(),
                "username" | "authclient" | "authclient_id"
            ),
            Source::Profile => false,
        }
    }
}

impl FromStr for LocalPath {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MappingError::InvalidLocalPath(s.to_string());
        let mut parts = s.split('.');
        let (Some(source), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if source.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        let source = source.parse().map_err(|_| invalid())?;
        Ok(Self::new(source, name))
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.name)
    }
}

/// One correspondence between a local attribute and a remote field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    local_path: LocalPath,
    remote_entity: String,
    remote_field: String,
    params: Params,
}

impl FieldMapping {
    /// Parse a mapping definition for `local_path`.
    ///
    /// Accepted definitions:
    /// - `"entity.field"`
    /// - a string holding a JSON object
    /// - `{"entity": ..., "field": ..., "params": {...}}`
    ///
    /// # Errors
    ///
    /// Returns `MappingError` if the local path or the definition is malformed.
    pub fn parse(local_path: &str, definition: &Value) -> Result<Self, MappingError> {
        let path: LocalPath = local_path.parse()?;
        let invalid = |reason: &str| MappingError::InvalidDefinition {
            local_path: local_path.to_string(),
            reason: reason.to_string(),
        };

        match definition {
            Value::String(s) if s.trim_start().starts_with('{') => {
                let decoded: Value = serde_json::from_str(s)?;
                Self::parse(local_path, &decoded)
            }
            Value::String(s) => {
                let (entity, field) = s
                    .split_once('.')
                    .filter(|(e, f)| !e.is_empty() && !f.is_empty())
                    .ok_or_else(|| invalid("expected 'entity.field'"))?;
                Ok(Self::new(path, entity, field, Params::new()))
            }
            Value::Object(obj) => {
                let key = |key: &'static str| {
                    obj.get(key)
                        .and_then(Value::as_str)
                        .filter(|v| !v.is_empty())
                        .ok_or(MappingError::MissingKeys {
                            local_path: local_path.to_string(),
                            key,
                        })
                };
                let entity = key("entity")?;
                let field = key("field")?;
                let params = match obj.get("params") {
                    None | Some(Value::Null) => Params::new(),
                    Some(Value::Array(a)) if a.is_empty() => Params::new(),
                    Some(Value::Object(p)) => {
                        p.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                    }
                    Some(_) => return Err(invalid("params must be an object")),
                };
                Ok(Self::new(path, entity, field, params))
            }
            _ => Err(invalid("expected a string or an object")),
        }
    }

    #[must_use]
    pub fn new(local_path: LocalPath, entity: &str, field: &str, params: Params) -> Self {
        Self {
            local_path,
            remote_entity: entity.to_lowercase(),
            remote_field: field.to_string(),
            params,
        }
    }

    #[must_use]
    pub const fn local_path(&self) -> &LocalPath {
        &self.local_path
    }

    /// Lower-case remote entity name.
    #[must_use]
    pub fn remote_entity(&self) -> &str {
        &self.remote_entity
    }

    #[must_use]
    pub fn remote_field(&self) -> &str {
        &self.remote_field
    }

    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// True unless the entity is the primary contact or activity.
    #[must_use]
    pub fn is_sub_entity(&self) -> bool {
        !PRIMARY_ENTITIES.contains(&self.remote_entity.as_str())
    }

    #[must_use]
    pub fn is_contact(&self) -> bool {
        self.remote_entity == "contact"
    }

    #[must_use]
    pub fn is_activity(&self) -> bool {
        self.remote_entity == "activity"
    }

    /// Whether this mapping is for `name`.
    ///
    /// `name` may be bare (`firstname`) or full (`profile.firstname`). When
    /// `source` is given the mapping must also belong to that source.
    #[must_use]
    pub fn is_for(&self, name: &str, source: Option<Source>) -> bool {
        if source.is_some_and(|s| !self.matches_source(s)) {
            return false;
        }
        match name.split_once('.') {
            Some(_) => self.local_path.to_string() == name,
            None => self.bare_name() == name,
        }
    }

    #[must_use]
    pub fn matches_source(&self, source: Source) -> bool {
        self.local_path.source() == source
    }

    /// Local attribute name without its source prefix.
    #[must_use]
    pub fn bare_name(&self) -> &str {
        self.local_path.name()
    }

    #[must_use]
    pub const fn source(&self) -> Source {
        self.local_path.source()
    }

    /// Prefix `bare` with this mapping's source.
    #[must_use]
    pub fn full_name(&self, bare: &str) -> String {
        format!("{}.{bare}", self.source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_structured_sub_entity() {
        let m = FieldMapping::parse(
            "profile.phone_mobile",
            &json!({"entity": "phone", "field": "phone", "params": {"location_type_id": 21}}),
        )
        .unwrap();

        assert_eq!(m.local_path().to_string(), "profile.phone_mobile");
        assert_eq!(m.remote_entity(), "phone");
        assert_eq!(m.remote_field(), "phone");
        assert_eq!(m.params().get("location_type_id"), Some(&json!(21)));
        assert!(m.is_sub_entity());
    }

    #[test]
    fn test_parse_short_form() {
        let m = FieldMapping::parse("profile.firstname", &json!("contact.first_name")).unwrap();
        assert_eq!(m.remote_entity(), "contact");
        assert_eq!(m.remote_field(), "first_name");
        assert!(m.params().is_empty());
        assert!(!m.is_sub_entity());
    }

    #[test]
    fn test_parse_short_form_splits_at_first_dot() {
        let m = FieldMapping::parse("profile.custom", &json!("Contact.custom_group.field")).unwrap();
        assert_eq!(m.remote_entity(), "contact");
        assert_eq!(m.remote_field(), "custom_group.field");
    }

    #[test]
    fn test_parse_json_string() {
        let def = json!(r#" {"entity":"address","field":"city","params":{"location_type_id":1}}"#);
        let m = FieldMapping::parse("profile.city", &def).unwrap();
        assert_eq!(m.remote_entity(), "address");
        assert_eq!(m.params().len(), 1);
    }

    #[test]
    fn test_parse_empty_params_array() {
        let m = FieldMapping::parse(
            "profile.url",
            &json!({"entity": "website", "field": "url", "params": []}),
        )
        .unwrap();
        assert!(m.params().is_empty());
    }

    #[test]
    fn test_parse_missing_keys() {
        let err = FieldMapping::parse("profile.city", &json!({"entity": "address"})).unwrap_err();
        assert!(matches!(err, MappingError::MissingKeys { key: "field", .. }));
    }

    #[test]
    fn test_parse_invalid_definitions() {
        for def in [json!(42), json!(null), json!("nodot"), json!(".field"), json!(["a"])] {
            let err = FieldMapping::parse("profile.x", &def).unwrap_err();
            assert!(matches!(err, MappingError::InvalidDefinition { .. }), "{def}");
        }
        let err = FieldMapping::parse(
            "profile.x",
            &json!({"entity": "phone", "field": "phone", "params": "home"}),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_parse_invalid_local_path() {
        for path in ["firstname", "profile.", ".firstname", "profile.a.b", "group.name"] {
            let err = FieldMapping::parse(path, &json!("contact.first_name")).unwrap_err();
            assert!(matches!(err, MappingError::InvalidLocalPath(_)), "{path}");
        }
    }

    #[test]
    fn test_name_queries() {
        let m = FieldMapping::parse("profile.firstname", &json!("contact.first_name")).unwrap();
        assert!(m.is_for("firstname", None));
        assert!(m.is_for("profile.firstname", None));
        assert!(m.is_for("firstname", Some(Source::Profile)));
        assert!(!m.is_for("firstname", Some(Source::User)));
        assert!(!m.is_for("user.firstname", None));
        assert_eq!(m.bare_name(), "firstname");
        assert_eq!(m.full_name("lastname"), "profile.lastname");
    }

    #[test]
    fn test_read_only_paths() {
        assert!("user.email".parse::<LocalPath>().unwrap().is_read_only());
        assert!("account.username".parse::<LocalPath>().unwrap().is_read_only());
        assert!(!"account.language".parse::<LocalPath>().unwrap().is_read_only());
        assert!(!"profile.firstname".parse::<LocalPath>().unwrap().is_read_only());
    }
}

//! Ordered collection of field mappings.

use serde_json::Value;

use super::field::FieldMapping;
use super::MappingError;

/// All configured mappings in configuration order.
#[derive(Debug, Clone, Default)]
pub struct FieldMappingCollection {
    mappings: Vec<FieldMapping>,
}

impl FieldMappingCollection {
    /// Parse a JSON object keyed by local path.
    ///
    /// # Errors
    ///
    /// Returns `MappingError` if the text is not a JSON object or any entry is invalid.
    pub fn load(json: &str) -> Result<Self, MappingError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Build from an already decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns `MappingError` on the first invalid entry.
    pub fn from_value(value: &Value) -> Result<Self, MappingError> {
        let obj = match value {
            Value::Object(obj) => obj,
            Value::Null => return Ok(Self::default()),
            _ => return Err(MappingError::NotAnObject),
        };
        let mappings = obj
            .iter()
            .map(|(path, def)| FieldMapping::parse(path, def))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { mappings })
    }

    #[must_use]
    pub fn from_mappings(mappings: Vec<FieldMapping>) -> Self {
        Self { mappings }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldMapping> {
        self.mappings.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mapping for a full local path, if configured.
    #[must_use]
    pub fn find(&self, local_path: &str) -> Option<&FieldMapping> {
        self.mappings
            .iter()
            .find(|m| m.local_path().to_string() == local_path)
    }

    /// Mappings that target the same remote sub-record as `mapping`.
    ///
    /// Only sub-entity mappings have siblings: same entity and equal params.
    pub fn siblings<'a>(
        &'a self,
        mapping: &'a FieldMapping,
        include_self: bool,
    ) -> impl Iterator<Item = &'a FieldMapping> {
        let applies = mapping.is_sub_entity();
        self.mappings.iter().filter(move |other| {
            applies
                && (include_self || !std::ptr::eq(*other, mapping))
                && other.remote_entity() == mapping.remote_entity()
                && other.params() == mapping.params()
        })
    }

    /// Same as [`siblings`](Self::siblings), addressed by local path.
    #[must_use]
    pub fn siblings_of_local_path(&self, local_path: &str, include_self: bool) -> Vec<&FieldMapping> {
        self.find(local_path)
            .map(|m| self.siblings(m, include_self).collect())
            .unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a FieldMappingCollection {
    type Item = &'a FieldMapping;
    type IntoIter = std::slice::Iter<'a, FieldMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPING: &str = r#"{
        "profile.firstname": "contact.first_name",
        "profile.street": {"entity": "address", "field": "street_address", "params": {"location_type_id": 1}},
        "profile.city": {"entity": "address", "field": "city", "params": {"location_type_id": 1}},
        "profile.phone_home": {"entity": "phone", "field": "phone", "params": {"location_type_id": 1}},
        "profile.phone_work": {"entity": "phone", "field": "phone", "params": {"location_type_id": 2}}
    }"#;

    fn paths(ms: &[&FieldMapping]) -> Vec<String> {
        ms.iter().map(|m| m.local_path().to_string()).collect()
    }

    #[test]
    fn test_load_preserves_order() {
        let c = FieldMappingCollection::load(MAPPING).unwrap();
        let all: Vec<_> = c.iter().collect();
        assert_eq!(
            paths(&all),
            vec![
                "profile.firstname",
                "profile.street",
                "profile.city",
                "profile.phone_home",
                "profile.phone_work"
            ]
        );
    }

    #[test]
    fn test_siblings_same_params() {
        let c = FieldMappingCollection::load(MAPPING).unwrap();
        assert_eq!(paths(&c.siblings_of_local_path("profile.street", false)), vec!["profile.city"]);
        assert_eq!(paths(&c.siblings_of_local_path("profile.city", false)), vec!["profile.street"]);
        assert_eq!(
            paths(&c.siblings_of_local_path("profile.city", true)),
            vec!["profile.street", "profile.city"]
        );
    }

    #[test]
    fn test_siblings_require_equal_params() {
        let c = FieldMappingCollection::load(MAPPING).unwrap();
        assert!(c.siblings_of_local_path("profile.phone_home", false).is_empty());
        assert!(c.siblings_of_local_path("profile.phone_work", false).is_empty());
    }

    #[test]
    fn test_primary_entities_have_no_siblings() {
        let c = FieldMappingCollection::load(
            r#"{"profile.firstname": "contact.first_name", "profile.lastname": "contact.last_name"}"#,
        )
        .unwrap();
        assert!(c.siblings_of_local_path("profile.firstname", true).is_empty());
    }

    #[test]
    fn test_load_aborts_on_invalid_entry() {
        let err = FieldMappingCollection::load(r#"{"profile.a": "contact.a", "profile.b": 5}"#).unwrap_err();
        assert!(matches!(err, MappingError::InvalidDefinition { .. }));
        assert!(matches!(
            FieldMappingCollection::load("[1, 2]").unwrap_err(),
            MappingError::NotAnObject
        ));
        assert!(FieldMappingCollection::load("").unwrap().is_empty());
    }
}

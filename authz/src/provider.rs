use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Source of user attributes.
///
/// `user_attributes(None)` returns the values for unauthenticated users.
/// Attributes missing from the returned map resolve to `null`.
pub trait UserAttributeProvider: Send + Sync {
    fn available_attributes(&self) -> Vec<String>;

    fn has_user_attribute(&self, name: &str) -> bool {
        self.available_attributes().iter().any(|attribute| attribute == name)
    }

    fn user_attributes(&self, user_identifier: Option<&str>) -> Result<HashMap<String, JsonValue>>;
}

/// Provider backed by configuration: defaults plus per-user overrides.
///
/// ```yaml
/// attributes:
///   ROLE_ADMIN: false
///   DEPARTMENT: null
/// users:
///   alice:
///     ROLE_ADMIN: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticUserAttributeProvider {
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub users: BTreeMap<String, BTreeMap<String, JsonValue>>,
}

impl StaticUserAttributeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, default: JsonValue) -> Self {
        self.attributes.insert(name.into(), default);
        self
    }

    pub fn with_user_value(
        mut self,
        user_identifier: impl Into<String>,
        name: impl Into<String>,
        value: JsonValue,
    ) -> Self {
        self.users
            .entry(user_identifier.into())
            .or_default()
            .insert(name.into(), value);
        self
    }
}

impl UserAttributeProvider for StaticUserAttributeProvider {
    fn available_attributes(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    fn has_user_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    fn user_attributes(&self, user_identifier: Option<&str>) -> Result<HashMap<String, JsonValue>> {
        let mut values: HashMap<String, JsonValue> = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if let Some(overrides) = user_identifier.and_then(|id| self.users.get(id)) {
            for (name, value) in overrides {
                // Overrides for undeclared attributes are ignored
                if let Some(slot) = values.get_mut(name) {
                    *slot = value.clone();
                }
            }
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_provider() {
        let provider = StaticUserAttributeProvider::new()
            .with_attribute("ROLE_ADMIN", json!(false))
            .with_user_value("alice", "ROLE_ADMIN", json!(true))
            .with_user_value("alice", "UNDECLARED", json!(1));

        assert!(provider.has_user_attribute("ROLE_ADMIN"));
        assert!(!provider.has_user_attribute("UNDECLARED"));

        let anonymous = provider.user_attributes(None).unwrap();
        assert_eq!(anonymous["ROLE_ADMIN"], json!(false));

        let alice = provider.user_attributes(Some("alice")).unwrap();
        assert_eq!(alice["ROLE_ADMIN"], json!(true));
        assert!(!alice.contains_key("UNDECLARED"));

        let bob = provider.user_attributes(Some("bob")).unwrap();
        assert_eq!(bob["ROLE_ADMIN"], json!(false));
    }

    #[test]
    fn test_static_provider_from_yaml() {
        let yaml = "attributes:\n  ROLE_ADMIN: false\n  DEPARTMENT: null\nusers:\n  alice:\n    ROLE_ADMIN: true\n";
        let provider: StaticUserAttributeProvider = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            provider.available_attributes(),
            vec!["DEPARTMENT".to_string(), "ROLE_ADMIN".to_string()]
        );
        assert_eq!(
            provider.user_attributes(Some("alice")).unwrap()["ROLE_ADMIN"],
            json!(true)
        );
    }
}

use crate::entity::EntityDefinition;
use crate::rules::ConditionalFieldRule;
use crate::{EntitiesError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Validated entity definitions by short name
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    definitions: BTreeMap<String, EntityDefinition>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = EntityDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: EntityDefinition) -> Result<()> {
        definition.validate()?;
        if self.definitions.contains_key(&definition.short_name) {
            return Err(EntitiesError::DuplicateEntity(definition.short_name));
        }
        debug!("Registered entity '{}'", definition.short_name);
        self.definitions
            .insert(definition.short_name.clone(), definition);
        Ok(())
    }

    /// Register a field rule from code, typically one with a predicate condition
    pub fn add_field_rule(&mut self, short_name: &str, rule: ConditionalFieldRule) -> Result<()> {
        let definition = self
            .definitions
            .get_mut(short_name)
            .ok_or_else(|| EntitiesError::EntityNotFound(short_name.to_string()))?;
        if let Some(field) = rule.fields.iter().find(|field| definition.field(field).is_none()) {
            return Err(EntitiesError::Validation(format!(
                "Entity '{}': reference to undeclared field '{}'",
                short_name, field
            )));
        }
        definition.field_rules.push(rule);
        Ok(())
    }

    pub fn get(&self, short_name: &str) -> Option<&EntityDefinition> {
        self.definitions.get(short_name)
    }

    pub fn require(&self, short_name: &str) -> Result<&EntityDefinition> {
        self.get(short_name)
            .ok_or_else(|| EntitiesError::EntityNotFound(short_name.to_string()))
    }

    pub fn short_names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.definitions.values()
    }

    /// Relations pointing at entities that are not registered
    pub fn dangling_relations(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for definition in self.definitions.values() {
            for (field, target) in &definition.relations {
                if !self.definitions.contains_key(target) {
                    dangling.push((format!("{}.{}", definition.short_name, field), target.clone()));
                }
            }
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldType};
    use crate::rules::RuleCondition;

    fn person() -> EntityDefinition {
        EntityDefinition::new("Person")
            .with_field(Field::new("id", FieldType::Text))
            .with_field(Field::new("name", FieldType::Text))
            .with_field(Field::new("employer", FieldType::Json))
            .with_relation("employer", "Company")
    }

    #[test]
    fn test_register_and_get() {
        let registry = EntityRegistry::from_definitions([person()]).unwrap();
        assert!(registry.get("Person").is_some());
        assert!(registry.get("Company").is_none());
        assert!(matches!(registry.require("Company"), Err(EntitiesError::EntityNotFound(_))));
        assert_eq!(registry.short_names().collect::<Vec<_>>(), vec!["Person"]);
        assert_eq!(
            registry.dangling_relations(),
            vec![("Person.employer".to_string(), "Company".to_string())]
        );
    }

    #[test]
    fn test_duplicate_and_invalid() {
        let mut registry = EntityRegistry::new();
        registry.register(person()).unwrap();
        assert!(matches!(registry.register(person()), Err(EntitiesError::DuplicateEntity(_))));
        assert!(registry.register(EntityDefinition::new("Empty")).is_err());
    }

    #[test]
    fn test_add_field_rule() {
        let mut registry = EntityRegistry::from_definitions([person()]).unwrap();
        let rule = ConditionalFieldRule::hide(["name"], RuleCondition::Policy("P".into()));
        registry.add_field_rule("Person", rule.clone()).unwrap();
        assert_eq!(registry.get("Person").unwrap().field_rules.len(), 1);

        assert!(registry.add_field_rule("Nobody", rule).is_err());
        let bad = ConditionalFieldRule::hide(["missing"], RuleCondition::Policy("P".into()));
        assert!(registry.add_field_rule("Person", bad).is_err());
    }
}

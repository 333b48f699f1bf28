use crate::entity::EntityDefinition;
use crate::Result;
use authz::{AttributeDirection, AttributeId, RequestAuthorizer};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use tracing::warn;

/// Decides which fields of an entity instance a user may read or write
pub trait EntityFieldAccessPolicy: Send + Sync {
    fn readable_fields(
        &self,
        authorizer: &RequestAuthorizer,
        entity: &EntityDefinition,
        instance: &JsonValue,
    ) -> Result<BTreeSet<String>>;

    /// `instance` is the stored instance on update, `None` on create
    fn writable_fields(
        &self,
        authorizer: &RequestAuthorizer,
        entity: &EntityDefinition,
        instance: Option<&JsonValue>,
    ) -> Result<BTreeSet<String>>;
}

/// Field access through resource permissions and conditional field rules
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFieldAccess;

impl PolicyFieldAccess {
    fn grants(
        authorizer: &RequestAuthorizer,
        entity: &EntityDefinition,
        attribute_id: &AttributeId,
        instance: &JsonValue,
    ) -> Result<bool> {
        let attribute_id = attribute_id.to_string();
        if !authorizer.service().has_resource_permission(&attribute_id) {
            warn!("No resource permission configured for '{}', denying access", attribute_id);
            return Ok(false);
        }
        Ok(authorizer.is_granted(&attribute_id, instance, entity.resource_alias())?)
    }

    fn apply_rules(
        authorizer: &RequestAuthorizer,
        entity: &EntityDefinition,
        direction: AttributeDirection,
        instance: Option<&JsonValue>,
        fields: &mut BTreeSet<String>,
    ) -> Result<()> {
        for rule in entity.field_rules.iter().filter(|rule| rule.direction == direction) {
            rule.apply(authorizer, entity.resource_alias(), instance, fields)?;
        }
        Ok(())
    }
}

impl EntityFieldAccessPolicy for PolicyFieldAccess {
    fn readable_fields(
        &self,
        authorizer: &RequestAuthorizer,
        entity: &EntityDefinition,
        instance: &JsonValue,
    ) -> Result<BTreeSet<String>> {
        let mut fields = entity.public_output_fields();
        for field in &entity.output_attributes {
            if Self::grants(authorizer, entity, &entity.output_attribute_id(field), instance)? {
                fields.insert(field.clone());
            }
        }
        Self::apply_rules(authorizer, entity, AttributeDirection::Output, Some(instance), &mut fields)?;
        Ok(fields)
    }

    fn writable_fields(
        &self,
        authorizer: &RequestAuthorizer,
        entity: &EntityDefinition,
        instance: Option<&JsonValue>,
    ) -> Result<BTreeSet<String>> {
        // A new instance has no properties yet
        let empty = JsonValue::Object(Map::new());
        let resource = instance.unwrap_or(&empty);

        let mut fields: BTreeSet<String> = entity.input_fields.iter().cloned().collect();
        for field in &entity.input_attributes {
            if Self::grants(authorizer, entity, &entity.input_attribute_id(field), resource)? {
                fields.insert(field.clone());
            }
        }
        Self::apply_rules(authorizer, entity, AttributeDirection::Input, Some(resource), &mut fields)?;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldType};
    use crate::rules::{ConditionalFieldRule, RuleCondition};
    use authz::{AuthorizationConfig, AuthorizationService, StaticUserAttributeProvider, UserAttributeRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> Arc<AuthorizationService> {
        let yaml = r#"
policies:
  ROLE_EDITOR: 'user.get("EDITOR")'
resource_permissions:
  "Article:output:notes": 'doc.owner == user.getIdentifier()'
  "Article:input:status": 'user.get("EDITOR") and doc.status != "final"'
"#;
        let config: AuthorizationConfig = serde_yaml::from_str(yaml).unwrap();
        let mut registry = UserAttributeRegistry::new();
        registry.add_provider(Arc::new(
            StaticUserAttributeProvider::new()
                .with_attribute("EDITOR", json!(false))
                .with_user_value("erin", "EDITOR", json!(true)),
        ));
        Arc::new(AuthorizationService::new(&config, registry).unwrap())
    }

    fn article() -> EntityDefinition {
        EntityDefinition::new("Article")
            .with_resource_alias("doc")
            .with_field(Field::new("id", FieldType::Integer))
            .with_field(Field::new("title", FieldType::Text))
            .with_field(Field::new("status", FieldType::Text))
            .with_field(Field::new("notes", FieldType::Text))
            .with_field(Field::new("audit", FieldType::Text))
            .with_input_fields(["title"])
            .with_output_attribute("notes")
            .with_output_attribute("audit")
            .with_input_attribute("status")
    }

    fn names(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|field| field.to_string()).collect()
    }

    #[test]
    fn test_readable_fields_per_instance() {
        let service = service();
        let alice = service.for_user(Some("alice".into()));
        let entity = article();

        // 'audit' has no resource permission and stays hidden
        let own = json!({"id": 1, "owner": "alice"});
        assert_eq!(
            PolicyFieldAccess.readable_fields(&alice, &entity, &own).unwrap(),
            names(&["id", "notes", "status", "title"])
        );

        let foreign = json!({"id": 2, "owner": "bob"});
        assert_eq!(
            PolicyFieldAccess.readable_fields(&alice, &entity, &foreign).unwrap(),
            names(&["id", "status", "title"])
        );
    }

    #[test]
    fn test_writable_fields() {
        let service = service();
        let entity = article();

        let erin = service.for_user(Some("erin".into()));
        assert_eq!(
            PolicyFieldAccess.writable_fields(&erin, &entity, None).unwrap(),
            names(&["status", "title"])
        );
        assert_eq!(
            PolicyFieldAccess
                .writable_fields(&erin, &entity, Some(&json!({"status": "final"})))
                .unwrap(),
            names(&["title"])
        );

        let bob = service.for_user(Some("bob".into()));
        assert_eq!(
            PolicyFieldAccess.writable_fields(&bob, &entity, None).unwrap(),
            names(&["title"])
        );
    }

    #[test]
    fn test_rules_by_direction() {
        let service = service();
        let entity = article()
            .with_field_rule(ConditionalFieldRule::hide(
                ["title"],
                RuleCondition::Expression(authz::Expression::parse("doc.status == 'final'").unwrap()),
            ))
            .with_field_rule(
                ConditionalFieldRule::hide(["title"], RuleCondition::Policy("ROLE_EDITOR".into()))
                    .for_input()
                    .for_class(),
            );

        let bob = service.for_user(Some("bob".into()));
        let readable = PolicyFieldAccess
            .readable_fields(&bob, &entity, &json!({"status": "final"}))
            .unwrap();
        assert!(!readable.contains("title"));
        assert!(PolicyFieldAccess
            .writable_fields(&bob, &entity, None)
            .unwrap()
            .contains("title"));

        let erin = service.for_user(Some("erin".into()));
        assert!(!PolicyFieldAccess
            .writable_fields(&erin, &entity, None)
            .unwrap()
            .contains("title"));
        assert!(PolicyFieldAccess
            .readable_fields(&erin, &entity, &json!({"status": "draft"}))
            .unwrap()
            .contains("title"));
    }
}

//! Conditional field rules.
//!
//! A rule shows or hides a set of fields when its condition holds. Rules
//! with `class` scope are evaluated without an instance, `instance` rules
//! see the instance under the entity's resource alias.
//!
//! ```yaml
//! field_rules:
//!   - effect: show
//!     fields: [notes]
//!     condition:
//!       expression: 'resource.status == "draft" and user.isAuthenticated()'
//!   - scope: class
//!     effect: hide
//!     fields: [views]
//!     condition:
//!       policy: ROLE_GUEST
//! ```

use authz::{AttributeDirection, Expression, RequestAuthorizer};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Class,
    #[default]
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Show,
    Hide,
}

/// Condition registered from code; receives the instance for `instance` rules
pub type RulePredicate =
    Arc<dyn Fn(&RequestAuthorizer, Option<&JsonValue>) -> authz::Result<bool> + Send + Sync>;

#[derive(Clone, Deserialize)]
#[serde(try_from = "RuleConditionConfig")]
pub enum RuleCondition {
    /// Named policy of the authorization configuration
    Policy(String),
    Expression(Expression),
    Predicate(RulePredicate),
}

impl fmt::Debug for RuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCondition::Policy(name) => f.debug_tuple("Policy").field(name).finish(),
            RuleCondition::Expression(expression) => {
                f.debug_tuple("Expression").field(expression).finish()
            }
            RuleCondition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleConditionConfig {
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    expression: Option<Expression>,
}

impl TryFrom<RuleConditionConfig> for RuleCondition {
    type Error = String;

    fn try_from(config: RuleConditionConfig) -> Result<Self, Self::Error> {
        match (config.policy, config.expression) {
            (Some(policy), None) => Ok(RuleCondition::Policy(policy)),
            (None, Some(expression)) => Ok(RuleCondition::Expression(expression)),
            _ => Err("a field rule condition needs exactly one of 'policy' or 'expression'".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalFieldRule {
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default = "default_direction")]
    pub direction: AttributeDirection,
    pub effect: RuleEffect,
    pub fields: Vec<String>,
    pub condition: RuleCondition,
}

fn default_direction() -> AttributeDirection {
    AttributeDirection::Output
}

impl ConditionalFieldRule {
    pub fn show<S: Into<String>>(fields: impl IntoIterator<Item = S>, condition: RuleCondition) -> Self {
        Self::new(RuleEffect::Show, fields, condition)
    }

    pub fn hide<S: Into<String>>(fields: impl IntoIterator<Item = S>, condition: RuleCondition) -> Self {
        Self::new(RuleEffect::Hide, fields, condition)
    }

    fn new<S: Into<String>>(
        effect: RuleEffect,
        fields: impl IntoIterator<Item = S>,
        condition: RuleCondition,
    ) -> Self {
        Self {
            scope: RuleScope::Instance,
            direction: AttributeDirection::Output,
            effect,
            fields: fields.into_iter().map(Into::into).collect(),
            condition,
        }
    }

    pub fn for_class(mut self) -> Self {
        self.scope = RuleScope::Class;
        self
    }

    pub fn for_input(mut self) -> Self {
        self.direction = AttributeDirection::Input;
        self
    }

    pub fn evaluate(
        &self,
        authorizer: &RequestAuthorizer,
        alias: &str,
        instance: Option<&JsonValue>,
    ) -> authz::Result<bool> {
        let instance = match self.scope {
            RuleScope::Class => None,
            RuleScope::Instance => instance,
        };
        match &self.condition {
            RuleCondition::Policy(name) => authorizer.is_granted_policy(name),
            RuleCondition::Expression(expression) => {
                authorizer.is_granted_expression(expression, instance.map(|value| (alias, value)))
            }
            RuleCondition::Predicate(predicate) => predicate(authorizer, instance),
        }
    }

    /// Evaluate the rule and add or remove its fields from `fields`
    pub fn apply(
        &self,
        authorizer: &RequestAuthorizer,
        alias: &str,
        instance: Option<&JsonValue>,
        fields: &mut BTreeSet<String>,
    ) -> authz::Result<()> {
        if !self.evaluate(authorizer, alias, instance)? {
            return Ok(());
        }
        for field in &self.fields {
            match self.effect {
                RuleEffect::Show => {
                    fields.insert(field.clone());
                }
                RuleEffect::Hide => {
                    fields.remove(field);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz::{AuthorizationConfig, AuthorizationService, StaticUserAttributeProvider, UserAttributeRegistry};
    use serde_json::json;

    fn service() -> Arc<AuthorizationService> {
        let mut registry = UserAttributeRegistry::new();
        registry.add_provider(Arc::new(
            StaticUserAttributeProvider::new()
                .with_attribute("EDITOR", json!(false))
                .with_user_value("erin", "EDITOR", json!(true)),
        ));
        let mut config = AuthorizationConfig::default();
        config.policies.insert("ROLE_EDITOR".into(), "user.get('EDITOR')".into());
        Arc::new(AuthorizationService::new(&config, registry).unwrap())
    }

    #[test]
    fn test_deserialize_rules() {
        let yaml = r#"
- effect: show
  fields: [notes]
  condition:
    expression: 'resource.status == "draft"'
- scope: class
  direction: input
  effect: hide
  fields: [views, score]
  condition:
    policy: ROLE_EDITOR
"#;
        let rules: Vec<ConditionalFieldRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0].scope, RuleScope::Instance);
        assert_eq!(rules[0].direction, AttributeDirection::Output);
        assert!(matches!(rules[0].condition, RuleCondition::Expression(_)));
        assert_eq!(rules[1].scope, RuleScope::Class);
        assert_eq!(rules[1].direction, AttributeDirection::Input);
        assert_eq!(rules[1].fields, vec!["views", "score"]);
        assert!(matches!(&rules[1].condition, RuleCondition::Policy(name) if name == "ROLE_EDITOR"));
    }

    #[test]
    fn test_condition_requires_exactly_one_kind() {
        let both = "effect: show\nfields: [a]\ncondition:\n  policy: P\n  expression: 'true'\n";
        assert!(serde_yaml::from_str::<ConditionalFieldRule>(both).is_err());
        let none = "effect: show\nfields: [a]\ncondition: {}\n";
        assert!(serde_yaml::from_str::<ConditionalFieldRule>(none).is_err());
        let broken = "effect: show\nfields: [a]\ncondition:\n  expression: 'resource.'\n";
        assert!(serde_yaml::from_str::<ConditionalFieldRule>(broken).is_err());
    }

    #[test]
    fn test_instance_rule_sees_resource() {
        let authorizer = service().for_user(None);
        let rule = ConditionalFieldRule::show(
            ["notes"],
            RuleCondition::Expression(Expression::parse("item.status == 'draft'").unwrap()),
        );

        let mut fields = BTreeSet::new();
        rule.apply(&authorizer, "item", Some(&json!({"status": "draft"})), &mut fields)
            .unwrap();
        assert!(fields.contains("notes"));

        let mut fields = BTreeSet::new();
        rule.apply(&authorizer, "item", Some(&json!({"status": "final"})), &mut fields)
            .unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_class_rule_ignores_instance() {
        let authorizer = service().for_user(None);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let rule = ConditionalFieldRule::hide(
            ["views"],
            RuleCondition::Predicate(Arc::new(move |_: &RequestAuthorizer, instance: Option<&JsonValue>| {
                recorder.lock().unwrap().push(instance.cloned());
                Ok(true)
            })),
        )
        .for_class();

        let mut fields: BTreeSet<String> = ["views".to_string(), "title".to_string()].into();
        rule.apply(&authorizer, "resource", Some(&json!({"id": 1})), &mut fields)
            .unwrap();
        assert_eq!(fields, ["title".to_string()].into());
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_policy_rule() {
        let service = service();
        let rule = ConditionalFieldRule::show(["notes"], RuleCondition::Policy("ROLE_EDITOR".into()));

        let mut fields = BTreeSet::new();
        rule.apply(&service.for_user(Some("erin".into())), "resource", None, &mut fields)
            .unwrap();
        assert!(fields.contains("notes"));

        let mut fields = BTreeSet::new();
        rule.apply(&service.for_user(Some("bob".into())), "resource", None, &mut fields)
            .unwrap();
        assert!(fields.is_empty());

        let undefined = ConditionalFieldRule::show(["notes"], RuleCondition::Policy("NOPE".into()));
        assert!(undefined
            .evaluate(&service.for_user(None), "resource", None)
            .is_err());
    }
}

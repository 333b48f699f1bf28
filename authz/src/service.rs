//! Policy-based authorization.
//!
//! [`AuthorizationService`] holds the compiled policies and is shared by
//! all requests. Each request gets a [`RequestAuthorizer`] bound to the
//! requesting user and a fresh attribute muxer, so no attribute value or
//! policy result outlives the request.

use crate::error::{AuthzError, Result};
use crate::expression::{Expression, Scope, UserContext};
use crate::muxer::{UserAttributeMuxer, UserAttributeRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Variable name resources are bound to unless configured otherwise
pub const DEFAULT_RESOURCE_ALIAS: &str = "resource";

/// Policy expressions by name
///
/// ```yaml
/// policies:
///   ROLE_ADMIN: 'user.get("ADMIN")'
/// resource_permissions:
///   "Article:output:notes": 'resource.owner == user.getIdentifier()'
/// operations:
///   "Article:get_collection": 'true'
/// attributes:
///   IS_STAFF: 'user.get("ADMIN") or user.get("EDITOR")'
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Policies evaluated without a resource
    #[serde(default)]
    pub policies: BTreeMap<String, String>,
    /// Policies evaluated against a resource, keyed by attribute id
    #[serde(default)]
    pub resource_permissions: BTreeMap<String, String>,
    /// Operation id to policy; operations without a policy are denied
    #[serde(default)]
    pub operations: BTreeMap<String, String>,
    /// Computed user attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

pub struct AuthorizationService {
    registry: Arc<UserAttributeRegistry>,
    policies: HashMap<String, Expression>,
    resource_permissions: HashMap<String, Expression>,
    operations: HashMap<String, Expression>,
}

impl AuthorizationService {
    /// Compile all policies and register computed attributes with `registry`
    pub fn new(config: &AuthorizationConfig, mut registry: UserAttributeRegistry) -> Result<Self> {
        let policies = compile("policy", &config.policies)?;
        let resource_permissions = compile("resource permission", &config.resource_permissions)?;
        let operations = compile("operation", &config.operations)?;
        let attributes = compile("attribute", &config.attributes)?;

        if !attributes.is_empty() {
            let names: Vec<String> = attributes.keys().cloned().collect();
            registry.on_available_attributes(move || names.clone());

            registry.on_get_attribute(move |event| {
                if let Some(expression) = attributes.get(event.attribute_name()) {
                    let user = MuxerUser {
                        muxer: event.muxer(),
                        user_identifier: event.user_identifier(),
                    };
                    let value = expression.evaluate(&Scope::new(&user))?;
                    event.set_value(value);
                }
                Ok(())
            });
        }

        info!(
            "Authorization service initialized with {} policies, {} resource permissions, {} operations, {} computed attributes",
            policies.len(),
            resource_permissions.len(),
            operations.len(),
            config.attributes.len()
        );

        Ok(Self {
            registry: Arc::new(registry),
            policies,
            resource_permissions,
            operations,
        })
    }

    pub fn registry(&self) -> &Arc<UserAttributeRegistry> {
        &self.registry
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn has_resource_permission(&self, attribute_id: &str) -> bool {
        self.resource_permissions.contains_key(attribute_id)
    }

    pub fn has_operation(&self, operation_id: &str) -> bool {
        self.operations.contains_key(operation_id)
    }

    /// Create the request-scoped authorizer for a user (`None` = anonymous)
    pub fn for_user(self: &Arc<Self>, user_identifier: Option<String>) -> RequestAuthorizer {
        RequestAuthorizer {
            service: Arc::clone(self),
            muxer: self.registry.create_muxer(),
            user_identifier,
            policy_cache: Mutex::new(HashMap::new()),
        }
    }
}

fn compile(kind: &str, sources: &BTreeMap<String, String>) -> Result<HashMap<String, Expression>> {
    sources
        .iter()
        .map(|(name, source)| {
            let expression = Expression::parse(source).map_err(|e| {
                AuthzError::PolicyParse(format!("{} '{}': {}", kind, name, e))
            })?;
            Ok((name.clone(), expression))
        })
        .collect()
}

/// The user seen by policy expressions, backed by a muxer
pub struct MuxerUser<'a> {
    muxer: &'a UserAttributeMuxer,
    user_identifier: Option<&'a str>,
}

impl UserContext for MuxerUser<'_> {
    fn get(&self, name: &str, default: JsonValue) -> Result<JsonValue> {
        self.muxer.get_attribute(self.user_identifier, name, default)
    }

    fn is_authenticated(&self) -> bool {
        self.user_identifier.is_some()
    }

    fn identifier(&self) -> Option<&str> {
        self.user_identifier
    }
}

/// Authorization decisions for one request and one user
pub struct RequestAuthorizer {
    service: Arc<AuthorizationService>,
    user_identifier: Option<String>,
    muxer: UserAttributeMuxer,
    policy_cache: Mutex<HashMap<String, bool>>,
}

impl RequestAuthorizer {
    pub fn user_identifier(&self) -> Option<&str> {
        self.user_identifier.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_identifier.is_some()
    }

    pub fn service(&self) -> &Arc<AuthorizationService> {
        &self.service
    }

    pub fn get_attribute(&self, name: &str) -> Result<JsonValue> {
        self.get_attribute_or(name, JsonValue::Null)
    }

    pub fn get_attribute_or(&self, name: &str, default: JsonValue) -> Result<JsonValue> {
        self.muxer.get_attribute(self.user_identifier(), name, default)
    }

    /// Evaluate a named policy; the result is cached for this request
    pub fn is_granted_policy(&self, name: &str) -> Result<bool> {
        if let Some(granted) = self.cache().get(name) {
            return Ok(*granted);
        }

        let expression = self
            .service
            .policies
            .get(name)
            .ok_or_else(|| AuthzError::PolicyUndefined(name.to_string()))?;
        let granted = expression.evaluate_bool(&Scope::new(&self.user()))?;

        debug!(
            "Policy '{}' for user {:?}: {}",
            name,
            self.user_identifier(),
            granted
        );
        self.cache().insert(name.to_string(), granted);
        Ok(granted)
    }

    /// Evaluate the resource permission `attribute_id` with `resource` bound to `alias`
    pub fn is_granted(&self, attribute_id: &str, resource: &JsonValue, alias: &str) -> Result<bool> {
        let expression = self
            .service
            .resource_permissions
            .get(attribute_id)
            .ok_or_else(|| AuthzError::PolicyUndefined(attribute_id.to_string()))?;
        self.is_granted_expression(expression, Some((alias, resource)))
    }

    pub fn is_granted_resource_permission(&self, attribute_id: &str, resource: &JsonValue) -> Result<bool> {
        self.is_granted(attribute_id, resource, DEFAULT_RESOURCE_ALIAS)
    }

    /// Evaluate an ad-hoc expression for this user
    pub fn is_granted_expression(
        &self,
        expression: &Expression,
        resource: Option<(&str, &JsonValue)>,
    ) -> Result<bool> {
        let user = self.user();
        let scope = match resource {
            Some((alias, value)) => Scope::new(&user).with_variable(alias, value),
            None => Scope::new(&user),
        };
        expression.evaluate_bool(&scope)
    }

    /// Fails with `Unauthorized`/`Forbidden` unless the operation policy grants access
    pub fn deny_operation_access_unless_granted(&self, operation_id: &str) -> Result<()> {
        let granted = match self.service.operations.get(operation_id) {
            Some(expression) => expression.evaluate_bool(&Scope::new(&self.user()))?,
            None => {
                warn!("No policy configured for operation '{}', denying access", operation_id);
                false
            }
        };

        if granted {
            return Ok(());
        }
        debug!(
            "Operation '{}' denied for user {:?}",
            operation_id,
            self.user_identifier()
        );
        if self.is_authenticated() {
            Err(AuthzError::Forbidden(operation_id.to_string()))
        } else {
            Err(AuthzError::Unauthorized)
        }
    }

    /// Fails with `Forbidden` unless the resource permission grants access
    pub fn deny_access_unless_granted(&self, attribute_id: &str, resource: &JsonValue, alias: &str) -> Result<()> {
        if self.is_granted(attribute_id, resource, alias)? {
            Ok(())
        } else {
            Err(AuthzError::Forbidden(attribute_id.to_string()))
        }
    }

    pub fn clear_caches(&self) {
        self.muxer.clear_caches();
        self.cache().clear();
    }

    pub fn reset(&self) {
        self.muxer.reset();
        self.cache().clear();
    }

    fn user(&self) -> MuxerUser<'_> {
        MuxerUser {
            muxer: &self.muxer,
            user_identifier: self.user_identifier(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.policy_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

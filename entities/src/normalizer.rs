//! Authorization-aware (de)normalization of entity instances.
//!
//! Normalizing keeps only the fields the current user may read, recursing
//! into relations so that every nested instance is filtered by the rules of
//! its own entity. Denormalizing drops the input fields the user may not
//! write.

use crate::access::{EntityFieldAccessPolicy, PolicyFieldAccess};
use crate::entity::EntityDefinition;
use crate::registry::EntityRegistry;
use crate::Result;
use authz::{AttributeId, RequestAuthorizer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Per-request normalization state
pub struct NormalizationContext<'a> {
    authorizer: &'a RequestAuthorizer,
    granted: BTreeSet<AttributeId>,
    processed: HashMap<(String, String), Vec<(JsonValue, BTreeSet<String>)>>,
}

impl<'a> NormalizationContext<'a> {
    pub fn new(authorizer: &'a RequestAuthorizer) -> Self {
        Self {
            authorizer,
            granted: BTreeSet::new(),
            processed: HashMap::new(),
        }
    }

    pub fn authorizer(&self) -> &RequestAuthorizer {
        self.authorizer
    }

    /// Gated attributes that were granted for at least one instance
    pub fn granted_attributes(&self) -> &BTreeSet<AttributeId> {
        &self.granted
    }

    pub fn is_processed(&self, short_name: &str, identifier: &str) -> bool {
        self.processed
            .contains_key(&(short_name.to_string(), identifier.to_string()))
    }
}

pub struct EntityNormalizer<P = PolicyFieldAccess> {
    registry: Arc<EntityRegistry>,
    access: P,
}

impl EntityNormalizer<PolicyFieldAccess> {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self::with_access_policy(registry, PolicyFieldAccess)
    }
}

impl<P: EntityFieldAccessPolicy> EntityNormalizer<P> {
    pub fn with_access_policy(registry: Arc<EntityRegistry>, access: P) -> Self {
        Self { registry, access }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Filter `value` (an instance or an array of instances) down to readable fields
    pub fn normalize(
        &self,
        value: &JsonValue,
        short_name: &str,
        ctx: &mut NormalizationContext<'_>,
    ) -> Result<JsonValue> {
        let Some(entity) = self.registry.get(short_name) else {
            debug!("No entity '{}' registered, passing value through", short_name);
            return Ok(value.clone());
        };

        match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.normalize(item, short_name, ctx))
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            JsonValue::Object(properties) => {
                let readable = self.readable_fields(entity, value, ctx)?;
                let mut normalized = Map::new();
                for (name, property) in properties {
                    if !readable.contains(name) {
                        continue;
                    }
                    let property = match entity.relation(name) {
                        Some(target) => self.normalize(property, target, ctx)?,
                        None => property.clone(),
                    };
                    normalized.insert(name.clone(), property);
                }
                Ok(JsonValue::Object(normalized))
            }
            // References by identifier and null relations
            other => Ok(other.clone()),
        }
    }

    pub fn normalize_entity<T: Serialize>(
        &self,
        entity: &T,
        short_name: &str,
        ctx: &mut NormalizationContext<'_>,
    ) -> Result<JsonValue> {
        let value = serde_json::to_value(entity)?;
        self.normalize(&value, short_name, ctx)
    }

    /// Drop the input fields the user may not write
    ///
    /// `existing` is the stored instance when updating.
    pub fn denormalize_value(
        &self,
        value: &JsonValue,
        short_name: &str,
        authorizer: &RequestAuthorizer,
        existing: Option<&JsonValue>,
    ) -> Result<JsonValue> {
        let Some(entity) = self.registry.get(short_name) else {
            debug!("No entity '{}' registered, passing input through", short_name);
            return Ok(value.clone());
        };

        match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.denormalize_value(item, short_name, authorizer, None))
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            JsonValue::Object(properties) => {
                let writable = self.access.writable_fields(authorizer, entity, existing)?;
                let mut accepted = Map::new();
                for (name, property) in properties {
                    if !writable.contains(name) {
                        debug!(
                            "Dropping non-writable input field '{}.{}' for user {:?}",
                            short_name,
                            name,
                            authorizer.user_identifier()
                        );
                        continue;
                    }
                    let property = match entity.relation(name) {
                        Some(target) => {
                            let current = existing.and_then(|instance| instance.get(name));
                            self.denormalize_value(property, target, authorizer, current)?
                        }
                        None => property.clone(),
                    };
                    accepted.insert(name.clone(), property);
                }
                Ok(JsonValue::Object(accepted))
            }
            other => Ok(other.clone()),
        }
    }

    pub fn denormalize<T: DeserializeOwned>(
        &self,
        value: &JsonValue,
        short_name: &str,
        authorizer: &RequestAuthorizer,
        existing: Option<&JsonValue>,
    ) -> Result<T> {
        let accepted = self.denormalize_value(value, short_name, authorizer, existing)?;
        Ok(serde_json::from_value(accepted)?)
    }

    fn readable_fields(
        &self,
        entity: &EntityDefinition,
        instance: &JsonValue,
        ctx: &mut NormalizationContext<'_>,
    ) -> Result<BTreeSet<String>> {
        let key = entity
            .identifier_of(instance)
            .map(|identifier| (entity.short_name.clone(), identifier));
        // Relations hold snapshots, so an identifier alone does not pin the content
        let cached = key
            .as_ref()
            .and_then(|key| ctx.processed.get(key))
            .and_then(|seen| seen.iter().find(|(snapshot, _)| snapshot == instance))
            .map(|(_, fields)| fields.clone());
        if let Some(fields) = cached {
            return Ok(fields);
        }

        let fields = self.access.readable_fields(ctx.authorizer, entity, instance)?;
        for attribute in entity.output_attributes.iter().filter(|field| fields.contains(*field)) {
            ctx.granted.insert(entity.output_attribute_id(attribute));
        }
        if let Some(key) = key {
            ctx.processed
                .entry(key)
                .or_default()
                .push((instance.clone(), fields.clone()));
        }
        Ok(fields)
    }
}

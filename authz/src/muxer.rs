//! User attribute resolution across providers.
//!
//! The [`UserAttributeRegistry`] is built once at startup and shared. Each
//! request resolves attributes through its own [`UserAttributeMuxer`],
//! which owns the value caches and the recursion guard.
//!
//! Resolution of `(user, name)`:
//!
//! 1. return the cached value if present
//! 2. fail with `UserAttributeUndefined` unless a provider declares `name`
//!    or an availability listener added it
//! 3. take the value from the first declaring provider (`null` otherwise)
//! 4. run the get-attribute listeners in registration order, each seeing
//!    the value set by the previous one
//! 5. cache the value and return it, falling back to the default for `null`

use crate::error::{AuthzError, Result};
use crate::provider::UserAttributeProvider;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, trace};

/// Adds attribute names to the set of available attributes
pub type AvailableAttributesListener = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// May inspect and override a resolved attribute value
pub type GetAttributeListener =
    Box<dyn Fn(&mut GetUserAttributeEvent<'_>) -> Result<()> + Send + Sync>;

/// Passed to get-attribute listeners
pub struct GetUserAttributeEvent<'a> {
    muxer: &'a UserAttributeMuxer,
    user_identifier: Option<&'a str>,
    attribute_name: &'a str,
    value: JsonValue,
}

impl<'a> GetUserAttributeEvent<'a> {
    pub fn user_identifier(&self) -> Option<&'a str> {
        self.user_identifier
    }

    pub fn attribute_name(&self) -> &'a str {
        self.attribute_name
    }

    pub fn value(&self) -> &JsonValue {
        &self.value
    }

    pub fn set_value(&mut self, value: JsonValue) {
        self.value = value;
    }

    pub fn muxer(&self) -> &'a UserAttributeMuxer {
        self.muxer
    }

    /// Resolve another attribute of the same user
    pub fn get_attribute(&self, name: &str, default: JsonValue) -> Result<JsonValue> {
        self.muxer.get_attribute(self.user_identifier, name, default)
    }
}

/// Providers and listeners, shared by all muxers
#[derive(Default)]
pub struct UserAttributeRegistry {
    providers: Vec<Arc<dyn UserAttributeProvider>>,
    available_listeners: Vec<AvailableAttributesListener>,
    get_listeners: Vec<GetAttributeListener>,
    additionally_available: OnceLock<BTreeSet<String>>,
}

impl UserAttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Providers are queried in registration order
    pub fn add_provider(&mut self, provider: Arc<dyn UserAttributeProvider>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    pub fn on_available_attributes(
        &mut self,
        listener: impl Fn() -> Vec<String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.available_listeners.push(Box::new(listener));
        self.additionally_available = OnceLock::new();
        self
    }

    pub fn on_get_attribute(
        &mut self,
        listener: impl Fn(&mut GetUserAttributeEvent<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.get_listeners.push(Box::new(listener));
        self
    }

    /// Union of provider-declared and listener-added attribute names
    pub fn available_attributes(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.additionally_available().clone();
        for provider in &self.providers {
            names.extend(provider.available_attributes());
        }
        names.into_iter().collect()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.additionally_available().contains(name)
            || self.providers.iter().any(|p| p.has_user_attribute(name))
    }

    pub fn create_muxer(self: &Arc<Self>) -> UserAttributeMuxer {
        UserAttributeMuxer::new(Arc::clone(self))
    }

    fn additionally_available(&self) -> &BTreeSet<String> {
        self.additionally_available.get_or_init(|| {
            let names: BTreeSet<String> = self
                .available_listeners
                .iter()
                .flat_map(|listener| listener())
                .collect();
            debug!("Additionally available user attributes: {:?}", names);
            names
        })
    }
}

type UserKey = Option<String>;

#[derive(Default)]
struct MuxerState {
    values: HashMap<(UserKey, String), JsonValue>,
    provider_values: HashMap<(usize, UserKey), HashMap<String, JsonValue>>,
    stack: Vec<String>,
}

/// Request-scoped attribute resolver
pub struct UserAttributeMuxer {
    registry: Arc<UserAttributeRegistry>,
    state: Mutex<MuxerState>,
}

impl UserAttributeMuxer {
    pub fn new(registry: Arc<UserAttributeRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(MuxerState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<UserAttributeRegistry> {
        &self.registry
    }

    pub fn available_attributes(&self) -> Vec<String> {
        self.registry.available_attributes()
    }

    pub fn get_attribute(
        &self,
        user_identifier: Option<&str>,
        name: &str,
        default: JsonValue,
    ) -> Result<JsonValue> {
        let key = (user_identifier.map(str::to_string), name.to_string());
        if let Some(value) = self.state().values.get(&key) {
            return Ok(or_default(value.clone(), default));
        }

        if !self.registry.is_available(name) {
            return Err(AuthzError::UserAttributeUndefined(name.to_string()));
        }

        let value = self.resolve_from_providers(user_identifier, name)?;

        let value = {
            let _guard = StackGuard::push(self, name)?;
            let mut event = GetUserAttributeEvent {
                muxer: self,
                user_identifier,
                attribute_name: name,
                value,
            };
            for listener in &self.registry.get_listeners {
                listener(&mut event)?;
            }
            event.value
        };

        trace!(
            "Resolved user attribute '{}' for {:?}: {}",
            name,
            user_identifier,
            value
        );
        self.state().values.insert(key, value.clone());

        Ok(or_default(value, default))
    }

    /// Drop all cached values
    pub fn clear_caches(&self) {
        let mut state = self.state();
        state.values.clear();
        state.provider_values.clear();
    }

    /// Drop cached values and the recursion stack
    pub fn reset(&self) {
        let mut state = self.state();
        *state = MuxerState::default();
    }

    fn resolve_from_providers(&self, user_identifier: Option<&str>, name: &str) -> Result<JsonValue> {
        let Some((index, provider)) = self
            .registry
            .providers
            .iter()
            .enumerate()
            .find(|(_, provider)| provider.has_user_attribute(name))
        else {
            return Ok(JsonValue::Null);
        };

        let cache_key = (index, user_identifier.map(str::to_string));
        if let Some(values) = self.state().provider_values.get(&cache_key) {
            return Ok(values.get(name).cloned().unwrap_or(JsonValue::Null));
        }

        let values = provider.user_attributes(user_identifier)?;
        let value = values.get(name).cloned().unwrap_or(JsonValue::Null);
        self.state().provider_values.insert(cache_key, values);
        Ok(value)
    }

    fn state(&self) -> MutexGuard<'_, MuxerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn or_default(value: JsonValue, default: JsonValue) -> JsonValue {
    if value.is_null() {
        default
    } else {
        value
    }
}

/// Keeps an attribute name on the recursion stack while its listeners run
struct StackGuard<'a> {
    muxer: &'a UserAttributeMuxer,
}

impl<'a> StackGuard<'a> {
    fn push(muxer: &'a UserAttributeMuxer, name: &str) -> Result<Self> {
        let mut state = muxer.state();
        if state.stack.iter().any(|entry| entry == name) {
            return Err(AuthzError::InfiniteEventLoopDetected(name.to_string()));
        }
        state.stack.push(name.to_string());
        Ok(Self { muxer })
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.muxer.state().stack.pop();
    }
}

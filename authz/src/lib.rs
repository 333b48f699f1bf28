//! Attribute-based authorization.
//!
//! User attributes (roles, permissions, arbitrary scalar values) are
//! resolved through pluggable [`UserAttributeProvider`]s by a
//! request-scoped [`UserAttributeMuxer`]. Policies are small expressions
//! over those attributes and, optionally, a resource instance; they decide
//! access to operations and to single entity fields.
//!
//! ```rust
//! use authz::{AuthorizationConfig, AuthorizationService, StaticUserAttributeProvider, UserAttributeRegistry};
//! use std::sync::Arc;
//!
//! let mut registry = UserAttributeRegistry::new();
//! registry.add_provider(Arc::new(
//!     StaticUserAttributeProvider::new()
//!         .with_attribute("ADMIN", serde_json::json!(false))
//!         .with_user_value("root", "ADMIN", serde_json::json!(true)),
//! ));
//!
//! let mut config = AuthorizationConfig::default();
//! config.policies.insert("ROLE_ADMIN".into(), "user.get('ADMIN')".into());
//!
//! let service = Arc::new(AuthorizationService::new(&config, registry).unwrap());
//! assert!(service.for_user(Some("root".into())).is_granted_policy("ROLE_ADMIN").unwrap());
//! assert!(!service.for_user(None).is_granted_policy("ROLE_ADMIN").unwrap());
//! ```

pub mod error;
pub mod expression;
pub mod muxer;
pub mod provider;
pub mod service;
pub mod types;

pub use error::{AuthzError, Result};
pub use expression::Expression;
pub use muxer::{GetUserAttributeEvent, UserAttributeMuxer, UserAttributeRegistry};
pub use provider::{StaticUserAttributeProvider, UserAttributeProvider};
pub use service::{AuthorizationConfig, AuthorizationService, RequestAuthorizer, DEFAULT_RESOURCE_ALIAS};
pub use types::{AttributeDirection, AttributeId};

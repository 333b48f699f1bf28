pub mod access;
pub mod entity;
pub mod error;
pub mod field;
pub mod normalizer;
pub mod registry;
pub mod rules;
pub mod schema_loader;

pub use access::{EntityFieldAccessPolicy, PolicyFieldAccess};
pub use entity::{default_identifier, Entity, EntityDefinition, GenericEntity};
pub use error::{EntitiesError, Result};
pub use field::{is_identifier, Field, FieldType};
pub use normalizer::{EntityNormalizer, NormalizationContext};
pub use registry::EntityRegistry;
pub use rules::{ConditionalFieldRule, RuleCondition, RuleEffect, RulePredicate, RuleScope};
pub use schema_loader::SchemaLoader;

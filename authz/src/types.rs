//! Attribute ids keyed by entity, direction and field.
//!
//! Resource permissions guarding single entity fields are configured under
//! ids of the form `<Entity>:output:<field>` (read) and
//! `<Entity>:input:<field>` (write).

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether an attribute is read (output) or written (input)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeDirection {
    Output,
    Input,
}

impl AttributeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDirection::Output => "output",
            AttributeDirection::Input => "input",
        }
    }
}

/// Typed id of an entity attribute, e.g. `Article:output:title`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId {
    pub entity: String,
    pub direction: AttributeDirection,
    pub field: String,
}

impl AttributeId {
    pub fn new(entity: impl Into<String>, direction: AttributeDirection, field: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            direction,
            field: field.into(),
        }
    }

    pub fn output(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(entity, AttributeDirection::Output, field)
    }

    pub fn input(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(entity, AttributeDirection::Input, field)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entity, self.direction.as_str(), self.field)
    }
}

impl FromStr for AttributeId {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(entity), Some(direction), Some(field)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthzError::PolicyParse(format!("invalid attribute id '{}'", s)));
        };

        let direction = match direction {
            "output" => AttributeDirection::Output,
            "input" => AttributeDirection::Input,
            other => {
                return Err(AuthzError::PolicyParse(format!(
                    "invalid attribute direction '{}' in '{}'",
                    other, s
                )))
            }
        };
        if entity.is_empty() || field.is_empty() {
            return Err(AuthzError::PolicyParse(format!("invalid attribute id '{}'", s)));
        }

        Ok(Self::new(entity, direction, field))
    }
}

use crate::{FilterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operators supported by condition nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    IEquals,
    Contains,
    IContains,
    IStartsWith,
    IEndsWith,
    GreaterThanOrEqual,
    LessThanOrEqual,
    InArray,
    IsNull,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Equals,
        Operator::IEquals,
        Operator::Contains,
        Operator::IContains,
        Operator::IStartsWith,
        Operator::IEndsWith,
        Operator::GreaterThanOrEqual,
        Operator::LessThanOrEqual,
        Operator::InArray,
        Operator::IsNull,
    ];

    /// Wire name used in query strings and in `to_array()` output
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::IEquals => "I_EQUALS",
            Operator::Contains => "CONTAINS",
            Operator::IContains => "I_CONTAINS",
            Operator::IStartsWith => "I_STARTS_WITH",
            Operator::IEndsWith => "I_ENDS_WITH",
            Operator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Operator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Operator::InArray => "IN_ARRAY",
            Operator::IsNull => "IS_NULL",
        }
    }

    /// Operators that compare against a string operand
    pub fn is_string_matching(&self) -> bool {
        matches!(
            self,
            Operator::IEquals
                | Operator::Contains
                | Operator::IContains
                | Operator::IStartsWith
                | Operator::IEndsWith
        )
    }

    /// Operators that lower-case both operands
    pub fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            Operator::IEquals | Operator::IContains | Operator::IStartsWith | Operator::IEndsWith
        )
    }

    /// Check that `value` is an acceptable operand for this operator.
    pub fn validate_value(&self, value: &JsonValue) -> Result<()> {
        match self {
            Operator::IsNull => {
                if !value.is_null() {
                    return Err(FilterError::ConditionValueError(format!(
                        "operator {} does not take a value",
                        self
                    )));
                }
            }
            Operator::InArray => match value.as_array() {
                Some(items) if !items.is_empty() => {}
                _ => {
                    return Err(FilterError::ConditionValueError(format!(
                        "operator {} requires a non-empty array",
                        self
                    )))
                }
            },
            op if op.is_string_matching() => {
                if !value.is_string() {
                    return Err(FilterError::ConditionValueError(format!(
                        "operator {} requires a string value",
                        self
                    )));
                }
            }
            _ => {
                if value.is_null() {
                    return Err(FilterError::ConditionValueError(format!(
                        "operator {} requires a value",
                        self
                    )));
                }
                if value.is_array() || value.is_object() {
                    return Err(FilterError::ConditionValueError(format!(
                        "operator {} requires a scalar value",
                        self
                    )));
                }
            }
        }
        Ok(())
    }

    /// Evaluate the operator for a field value read from a row.
    ///
    /// `field` is `None` when the row has no such field.
    pub fn evaluate(&self, field: Option<&JsonValue>, value: &JsonValue) -> bool {
        let field = match field {
            Some(JsonValue::Null) | None => return *self == Operator::IsNull,
            Some(field) => field,
        };

        match self {
            Operator::IsNull => false,
            Operator::Equals => values_equal(field, value),
            Operator::InArray => value
                .as_array()
                .map(|items| items.iter().any(|item| values_equal(field, item)))
                .unwrap_or(false),
            Operator::GreaterThanOrEqual => matches!(
                compare_values(field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThanOrEqual => matches!(
                compare_values(field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            _ => {
                let (Some(haystack), Some(needle)) = (scalar_to_string(field), value.as_str())
                else {
                    return false;
                };
                let (haystack, needle) = if self.is_case_insensitive() {
                    (haystack.to_lowercase(), needle.to_lowercase())
                } else {
                    (haystack, needle.to_string())
                };
                match self {
                    Operator::IEquals => haystack == needle,
                    Operator::Contains | Operator::IContains => haystack.contains(&needle),
                    Operator::IStartsWith => haystack.starts_with(&needle),
                    Operator::IEndsWith => haystack.ends_with(&needle),
                    _ => false,
                }
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| FilterError::ConditionOperatorUndefined(s.to_string()))
    }
}

/// Equality with numeric normalization (`2 == 2.0`)
fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare_values(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

//! Error types for filter, sort and pagination handling.
//!
//! Every variant carries a stable error id (see [`FilterError::error_id`])
//! so that API clients can react to a specific problem programmatically.

use thiserror::Error;

/// Errors raised while building, parsing or validating queries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    /// The `filter` query parameter was not a bracket group.
    #[error("Filter parameter must be an array")]
    FilterParameterMustBeArray,

    /// A condition or shortcut referenced a path the caller does not expose.
    #[error("Undefined attribute path: '{0}'")]
    AttributePathUndefined(String),

    /// A condition item has no `path`.
    #[error("Condition path is missing in filter item '{0}'")]
    ConditionPathMissing(String),

    /// The value is missing or does not fit the operator.
    #[error("Invalid condition value: {0}")]
    ConditionValueError(String),

    /// The operator name is not known.
    #[error("Undefined condition operator: '{0}'")]
    ConditionOperatorUndefined(String),

    /// The item is neither a condition, a group nor a shortcut.
    #[error("Invalid filter item: {0}")]
    FilterItemInvalid(String),

    /// The item id is reserved (e.g. `@root`).
    #[error("Filter item id '{0}' is reserved")]
    ReservedFilterItemId(String),

    /// The group conjunction is not known.
    #[error("Undefined conjunction: '{0}'")]
    ConjunctionUndefined(String),

    /// The filter tree violates a structural constraint.
    #[error("Invalid filter: {0}")]
    InvalidTree(String),

    /// The fluent builder was used incorrectly (unbalanced `end()`).
    #[error("Filter builder misuse: {0}")]
    Builder(String),

    /// The sort parameter could not be parsed or referenced an unknown path.
    #[error("Invalid sort: {0}")]
    SortInvalid(String),
}

impl FilterError {
    /// Stable identifier of the error kind.
    pub fn error_id(&self) -> &'static str {
        match self {
            FilterError::FilterParameterMustBeArray => "FILTER_PARAMETER_MUST_BE_AN_ARRAY",
            FilterError::AttributePathUndefined(_) => "ATTRIBUTE_PATH_UNDEFINED",
            FilterError::ConditionPathMissing(_) => "CONDITION_PATH_MISSING",
            FilterError::ConditionValueError(_) => "CONDITION_VALUE_ERROR",
            FilterError::ConditionOperatorUndefined(_) => "CONDITION_OPERATOR_UNDEFINED",
            FilterError::FilterItemInvalid(_) => "FILTER_ITEM_INVALID",
            FilterError::ReservedFilterItemId(_) => "RESERVED_FILTER_ITEM_ID",
            FilterError::ConjunctionUndefined(_) => "CONJUNCTION_UNDEFINED",
            FilterError::InvalidTree(_) => "FILTER_INVALID",
            FilterError::Builder(_) => "FILTER_INVALID",
            FilterError::SortInvalid(_) => "SORT_INVALID",
        }
    }
}

/// A specialized Result type for query operations.
pub type Result<T> = std::result::Result<T, FilterError>;

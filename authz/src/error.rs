//! Error types for attribute resolution and authorization.
//!
//! Denials (`Unauthorized`, `Forbidden`) are expected per-request outcomes.
//! All other variants signal a misconfiguration and are surfaced as
//! internal errors by the API layer.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthzError {
    /// The attribute is neither declared by a provider nor made available
    /// by an availability listener.
    #[error("User attribute '{0}' undefined")]
    UserAttributeUndefined(String),

    /// A get-attribute listener re-entered resolution of the attribute it
    /// is resolving.
    #[error("Infinite event loop detected while resolving user attribute '{0}'")]
    InfiniteEventLoopDetected(String),

    /// A policy expression could not be parsed.
    #[error("Policy parsing failed: {0}")]
    PolicyParse(String),

    /// A policy expression failed at runtime (unknown variable, bad operand).
    #[error("Policy evaluation failed: {0}")]
    PolicyEvaluation(String),

    /// No policy is configured under the given name.
    #[error("Policy '{0}' undefined")]
    PolicyUndefined(String),

    /// An attribute provider failed.
    #[error("User attribute provider failed: {0}")]
    Provider(String),

    /// Access denied for an anonymous user.
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied for an authenticated user.
    #[error("Access denied: {0}")]
    Forbidden(String),
}

impl AuthzError {
    /// Whether this is an access decision rather than a failure
    pub fn is_denial(&self) -> bool {
        matches!(self, AuthzError::Unauthorized | AuthzError::Forbidden(_))
    }
}

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthzError::UserAttributeUndefined("ROLE_X".to_string());
        assert_eq!(err.to_string(), "User attribute 'ROLE_X' undefined");

        let err = AuthzError::Unauthorized;
        assert_eq!(err.to_string(), "Authentication required");
    }

    #[test]
    fn test_denials() {
        assert!(AuthzError::Unauthorized.is_denial());
        assert!(AuthzError::Forbidden("x".into()).is_denial());
        assert!(!AuthzError::PolicyUndefined("x".into()).is_denial());
        assert!(!AuthzError::InfiniteEventLoopDetected("x".into()).is_denial());
    }
}

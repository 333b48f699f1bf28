use authz::AuthzError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use database::DatabaseError;
use entities::EntitiesError;
use query::FilterError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API Error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("{0}")]
    Filter(#[from] FilterError),

    #[error("Prepared filter '{0}' may not be used")]
    PreparedFilterAccessDenied(String),

    #[error("Prepared filter '{0}' undefined")]
    PreparedFilterUndefined(String),

    #[error("Query filters are disabled")]
    QueryFiltersDisabled,

    #[error("Prepared filters are disabled")]
    PreparedFiltersDisabled,

    #[error("Sorting is disabled")]
    SortDisabled,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::EntityNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidEntityType(_) => StatusCode::BAD_REQUEST,
            ApiError::Filter(_) => StatusCode::BAD_REQUEST,
            ApiError::PreparedFilterAccessDenied(_) => StatusCode::FORBIDDEN,
            ApiError::PreparedFilterUndefined(_) => StatusCode::BAD_REQUEST,
            ApiError::QueryFiltersDisabled => StatusCode::BAD_REQUEST,
            ApiError::PreparedFiltersDisabled => StatusCode::BAD_REQUEST,
            ApiError::SortDisabled => StatusCode::BAD_REQUEST,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for the error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::EntityNotFound(_) => "core:entity-not-found",
            ApiError::InvalidEntityType(_) => "core:invalid-entity-type",
            ApiError::Filter(FilterError::FilterParameterMustBeArray) => {
                "core:filter-parameter-must-be-an-array"
            }
            ApiError::Filter(FilterError::SortInvalid(_)) => "core:sort-invalid",
            ApiError::Filter(_) => "core:filter-invalid",
            ApiError::PreparedFilterAccessDenied(_) => "core:prepared-filter-access-denied",
            ApiError::PreparedFilterUndefined(_) => "core:prepared-filter-undefined",
            ApiError::QueryFiltersDisabled => "core:query-filters-disabled",
            ApiError::PreparedFiltersDisabled => "core:prepared-filters-disabled",
            ApiError::SortDisabled => "core:sort-disabled",
            ApiError::DatabaseError(_) => "core:database-error",
            ApiError::ValidationError(_) => "core:validation-error",
            ApiError::Unauthorized => "core:unauthorized",
            ApiError::Forbidden(_) => "core:forbidden",
            ApiError::BadRequest(_) => "core:bad-request",
            ApiError::InternalError(_) => "core:internal-error",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Filter(err) => Some(json!({ "reason": err.error_id() })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = ApiErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Denials keep their meaning, everything else is a server-side failure
impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthorized => ApiError::Unauthorized,
            AuthzError::Forbidden(what) => ApiError::Forbidden(what),
            other => {
                error!("Authorization failure: {}", other);
                ApiError::InternalError(other.to_string())
            }
        }
    }
}

impl From<EntitiesError> for ApiError {
    fn from(err: EntitiesError) -> Self {
        match err {
            EntitiesError::Authorization(err) => err.into(),
            EntitiesError::EntityNotFound(name) => ApiError::InvalidEntityType(name),
            EntitiesError::Validation(message) => ApiError::ValidationError(message),
            other => {
                error!("Entity processing failure: {}", other);
                ApiError::InternalError(other.to_string())
            }
        }
    }
}

/// Convert database errors to API errors
impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Validation(message) => ApiError::ValidationError(message),
            DatabaseError::EntityNotFound(message) => ApiError::EntityNotFound(message),
            DatabaseError::Entities(err) => err.into(),
            other => {
                error!("Database failure: {}", other);
                ApiError::DatabaseError(other.to_string())
            }
        }
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

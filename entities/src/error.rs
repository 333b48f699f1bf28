use thiserror::Error;

pub type Result<T> = std::result::Result<T, EntitiesError>;

#[derive(Error, Debug)]
pub enum EntitiesError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema parsing error: {0}")]
    SchemaParsing(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("YAML parsing error: {0}")]
    YamlParsing(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQL execution error: {0}")]
    SqlExecution(String),

    #[error(transparent)]
    Authorization(#[from] authz::AuthzError),
}

// Helper to convert from sqlx errors
impl From<sqlx::Error> for EntitiesError {
    fn from(err: sqlx::Error) -> Self {
        EntitiesError::Database(err.to_string())
    }
}

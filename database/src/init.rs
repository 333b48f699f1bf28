use crate::{Database, Result};
use entities::{Entity, EntityRegistry, GenericEntity};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Database initialization configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite:` URL, `:memory:` or file path
    #[serde(default = "default_url")]
    pub url: String,
    /// Whether to create entity tables on initialization
    #[serde(default = "default_create_tables")]
    pub create_tables: bool,
}

fn default_url() -> String {
    "data/relay.db".to_string()
}

fn default_create_tables() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            create_tables: default_create_tables(),
        }
    }
}

impl DatabaseConfig {
    pub fn new_with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set whether to create tables on initialization
    pub fn with_create_tables(mut self, create: bool) -> Self {
        self.create_tables = create;
        self
    }
}

/// Connect and, if configured, create the tables of all registered entities
pub async fn initialize_database(config: &DatabaseConfig, registry: &EntityRegistry) -> Result<Arc<Database>> {
    info!("Initializing database at {}", config.url);

    let db = Arc::new(Database::new(&config.url).await?);

    if config.create_tables {
        create_entity_tables(&db, registry).await?;
    }

    Ok(db)
}

/// Create tables for every registered entity
///
/// Failures are logged per entity; the first one is returned after all
/// entities were attempted.
pub async fn create_entity_tables(db: &Database, registry: &EntityRegistry) -> Result<()> {
    info!("Creating tables for {} entities", registry.definitions().count());

    let mut first_error = None;
    for definition in registry.definitions() {
        let entity = GenericEntity::new(definition.clone());
        match entity.create_tables(db.pool()).await {
            Ok(_) => info!("Created tables for entity: {}", definition.short_name),
            Err(e) => {
                error!("Failed to create tables for entity {}: {}", definition.short_name, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entities::{EntityDefinition, Field, FieldType};
    use tempfile::TempDir;

    fn registry() -> EntityRegistry {
        EntityRegistry::from_definitions([EntityDefinition::new("Article")
            .with_field(Field::new("id", FieldType::Integer))
            .with_field(Field::new("title", FieldType::Text))])
        .unwrap()
    }

    #[tokio::test]
    async fn test_database_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let config = DatabaseConfig::new_with_url(db_path.to_string_lossy());
        let db = initialize_database(&config, &registry()).await.unwrap();

        assert!(db_path.exists());
        assert!(db.table_exists("article").await.unwrap());
    }

    #[tokio::test]
    async fn test_skip_table_creation() {
        let config = DatabaseConfig::new_with_url("sqlite::memory:").with_create_tables(false);
        let db = initialize_database(&config, &registry()).await.unwrap();
        assert!(!db.table_exists("article").await.unwrap());
    }

    #[test]
    fn test_config_defaults() {
        let config: DatabaseConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DatabaseConfig::default());
        assert!(config.create_tables);
    }
}

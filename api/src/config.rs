//! Service configuration.
//!
//! Loaded from a YAML file (`RELAY_CONFIG_PATH`, default `config/relay.yaml`)
//! after reading `.env`. A missing file yields the defaults. Environment
//! variables override single values:
//!
//! - `RELAY_DATABASE_URL`
//! - `RELAY_PORT`
//! - `RELAY_LOG_DIR`

use crate::request_options::RestConfig;
use authz::{AuthorizationConfig, AuthzError, StaticUserAttributeProvider};
use database::DatabaseConfig;
use entities::{EntitiesError, EntityDefinition, EntityRegistry, SchemaLoader};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const CONFIG_PATH_VAR: &str = "RELAY_CONFIG_PATH";
pub const DATABASE_URL_VAR: &str = "RELAY_DATABASE_URL";
pub const PORT_VAR: &str = "RELAY_PORT";
pub const LOG_DIR_VAR: &str = "RELAY_LOG_DIR";

const DEFAULT_CONFIG_PATH: &str = "config/relay.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {0}: {1}")]
    InvalidVariable(&'static str, String),

    #[error("Invalid entity configuration: {0}")]
    Entities(#[from] EntitiesError),

    #[error("Invalid authorization configuration: {0}")]
    Authorization(#[from] AuthzError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directive for `EnvFilter` when `RUST_LOG` is unset
    pub filter: Option<String>,
    /// Directory for daily rolling log files; console only if unset
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub authorization: AuthorizationConfig,
    pub user_attributes: StaticUserAttributeProvider,
    /// Inline entity definitions
    pub entities: Vec<EntityDefinition>,
    /// Directory of `*.entity.yaml` files
    pub entity_schema_path: Option<PathBuf>,
    pub rest: RestConfig,
}

impl CoreConfig {
    /// Load `.env`, the configuration file and the environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Configuration file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        info!("Loading configuration from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup(DATABASE_URL_VAR) {
            self.database.url = url;
        }
        if let Some(port) = lookup(PORT_VAR) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVariable(PORT_VAR, port.clone()))?;
        }
        if let Some(directory) = lookup(LOG_DIR_VAR) {
            self.logging.directory = Some(PathBuf::from(directory));
        }
        Ok(())
    }

    /// Entities from the schema directory followed by the inline definitions
    pub fn build_registry(&self) -> Result<EntityRegistry, ConfigError> {
        let mut definitions = match &self.entity_schema_path {
            Some(path) => SchemaLoader::load_entities_from_directory(path)?,
            None => Vec::new(),
        };
        for definition in &self.entities {
            SchemaLoader::validate_definition(definition)?;
            definitions.push(definition.clone());
        }

        let registry = EntityRegistry::from_definitions(definitions)?;
        for (field, target) in registry.dangling_relations() {
            warn!("Relation '{}' targets unknown entity '{}'", field, target);
        }
        info!("Registered {} entities", registry.definitions().count());

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
server:
  port: 8080
database:
  url: "sqlite::memory:"
authorization:
  policies:
    ROLE_ADMIN: 'user.get("ADMIN")'
  operations:
    "Article:get_collection": 'true'
user_attributes:
  attributes:
    ADMIN: false
  users:
    alice:
      ADMIN: true
entities:
  - short_name: Article
    fields:
      - { name: id, type: integer }
      - { name: title, type: text, required: true }
    input_fields: [title]
rest:
  sort_enabled: false
  prepared_filters:
    - id: titled
      filter: 'filter[title][operator]=I_CONTAINS&filter[title][value]=a'
"#;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::from_yaml_str("").unwrap();
        assert_eq!(config.server.port, 3030);
        assert_eq!(config.database, DatabaseConfig::default());
        assert!(config.rest.query_filters_enabled);
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let config = CoreConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(config.authorization.policies.contains_key("ROLE_ADMIN"));
        assert!(config.user_attributes.users.contains_key("alice"));
        assert!(!config.rest.sort_enabled);
        assert!(config.rest.prepared_filter("titled").is_some());

        let registry = config.build_registry().unwrap();
        assert_eq!(registry.require("Article").unwrap().input_fields, vec!["title"]);
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = CoreConfig::from_yaml_str(CONFIG).unwrap();
        let env: HashMap<&str, &str> = [
            (DATABASE_URL_VAR, "data/other.db"),
            (PORT_VAR, "9000"),
            (LOG_DIR_VAR, "/var/log/relay"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|name| env.get(name).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.database.url, "data/other.db");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.directory, Some(PathBuf::from("/var/log/relay")));

        let err = config
            .apply_overrides(|name| (name == PORT_VAR).then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVariable(PORT_VAR, _)));
    }

    #[test]
    fn test_registry_from_schema_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("tag.entity.yaml"),
            "short_name: Tag\nfields:\n  - { name: id, type: integer }\n  - { name: label, type: text }\n",
        )
        .unwrap();

        let mut config = CoreConfig::from_yaml_str(CONFIG).unwrap();
        config.entity_schema_path = Some(dir.path().to_path_buf());

        let registry = config.build_registry().unwrap();
        let mut names: Vec<&str> = registry.short_names().collect();
        names.sort();
        assert_eq!(names, vec!["Article", "Tag"]);
    }

    #[test]
    fn test_duplicate_entity_is_rejected() {
        let mut config = CoreConfig::from_yaml_str(CONFIG).unwrap();
        config.entities.push(config.entities[0].clone());
        assert!(matches!(
            config.build_registry(),
            Err(ConfigError::Entities(EntitiesError::DuplicateEntity(_)))
        ));
    }

    #[test]
    fn test_sample_configuration() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("..");
        let mut config = CoreConfig::from_file(&root.join("config/relay.yaml")).unwrap();
        config.entity_schema_path = Some(root.join("config/entities"));

        let registry = config.build_registry().unwrap();
        let article = registry.require("Article").unwrap();
        assert_eq!(article.field_rules.len(), 1);
        assert!(config.rest.prepared_filter("drafts").unwrap().policy.is_some());

        let mut attributes = authz::UserAttributeRegistry::new();
        attributes.add_provider(std::sync::Arc::new(config.user_attributes.clone()));
        assert!(authz::AuthorizationService::new(&config.authorization, attributes).is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = CoreConfig::from_file(Path::new("/nonexistent/relay.yaml")).unwrap();
        assert_eq!(config.server.port, 3030);
    }
}

use crate::entity::EntityDefinition;
use crate::error::{EntitiesError, Result};
use crate::registry::EntityRegistry;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Load entity definitions from YAML files
pub struct SchemaLoader;

impl SchemaLoader {
    /// Load a single entity definition from a YAML file
    pub fn load_entity_from_file(path: &Path) -> Result<EntityDefinition> {
        debug!("Loading entity schema from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .map_err(|e| EntitiesError::SchemaParsing(format!("Failed to read file: {}", e)))?;

        let definition: EntityDefinition = serde_yaml::from_str(&content)
            .map_err(|e| EntitiesError::SchemaParsing(format!("Failed to parse YAML: {}", e)))?;
        Self::validate_definition(&definition)?;

        info!("Loaded entity '{}' from {:?}", definition.short_name, path);
        Ok(definition)
    }

    /// Load all `*.entity.yaml` / `*.entity.yml` definitions from a directory
    ///
    /// Files that fail to load are logged and skipped.
    pub fn load_entities_from_directory(dir: &Path) -> Result<Vec<EntityDefinition>> {
        info!("Loading entity schemas from directory: {:?}", dir);

        if !dir.exists() {
            return Err(EntitiesError::SchemaParsing(format!(
                "Schema directory does not exist: {:?}",
                dir
            )));
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| EntitiesError::SchemaParsing(format!("Failed to read directory: {}", e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| EntitiesError::SchemaParsing(format!("Failed to read directory entry: {}", e)))?
                .path();
            if Self::is_entity_schema(&path) {
                paths.push(path);
            }
        }
        // Directory order is platform dependent
        paths.sort();

        let mut definitions = Vec::new();
        for path in paths {
            match Self::load_entity_from_file(&path) {
                Ok(definition) => definitions.push(definition),
                Err(e) => error!("Failed to load schema from {:?}: {}", path, e),
            }
        }

        info!("Loaded {} entity schemas", definitions.len());
        Ok(definitions)
    }

    /// Load a directory into a registry; duplicates are an error
    pub fn load_registry(dir: &Path) -> Result<EntityRegistry> {
        let registry = EntityRegistry::from_definitions(Self::load_entities_from_directory(dir)?)?;
        for (field, target) in registry.dangling_relations() {
            warn!("Relation '{}' targets unknown entity '{}'", field, target);
        }
        Ok(registry)
    }

    /// Validate an entity definition
    pub fn validate_definition(definition: &EntityDefinition) -> Result<()> {
        if definition.fields.is_empty() {
            return Err(EntitiesError::Validation(format!(
                "Entity '{}' has no fields",
                definition.short_name
            )));
        }
        definition.validate()
    }

    fn is_entity_schema(path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .map(|name| name.to_string_lossy())
                .is_some_and(|name| name.ends_with(".entity.yaml") || name.ends_with(".entity.yml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::rules::RuleScope;
    use std::fs;

    const ARTICLE: &str = r#"
short_name: Article
description: A blog article
fields:
  - name: id
    type: integer
  - name: title
    type: text
    required: true
  - name: notes
    type: text
  - name: author
    type: json
input_fields: [title]
output_attributes: [notes]
relations:
  author: Person
field_rules:
  - scope: class
    effect: hide
    fields: [title]
    condition:
      policy: ROLE_GUEST
"#;

    const PERSON: &str = r#"
short_name: Person
table: people
fields:
  - name: id
    type: text
  - name: name
    type: text
"#;

    #[test]
    fn test_load_entity_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article.entity.yaml");
        fs::write(&path, ARTICLE).unwrap();

        let definition = SchemaLoader::load_entity_from_file(&path).unwrap();
        assert_eq!(definition.short_name, "Article");
        assert_eq!(definition.identifier, "id");
        assert_eq!(definition.fields.len(), 4);
        assert_eq!(definition.fields[1].field_type, FieldType::Text);
        assert!(definition.fields[1].required);
        assert_eq!(definition.relation("author"), Some("Person"));
        assert_eq!(definition.field_rules[0].scope, RuleScope::Class);
        assert_eq!(definition.table_name(), "article");
    }

    #[test]
    fn test_load_entities_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("article.entity.yaml"), ARTICLE).unwrap();
        fs::write(dir.path().join("person.entity.yml"), PERSON).unwrap();
        fs::write(dir.path().join("notes.yaml"), "not: an entity").unwrap();
        fs::write(dir.path().join("broken.entity.yaml"), "short_name: [").unwrap();

        let definitions = SchemaLoader::load_entities_from_directory(dir.path()).unwrap();
        let names: Vec<_> = definitions.iter().map(|d| d.short_name.as_str()).collect();
        assert_eq!(names, vec!["Article", "Person"]);

        let registry = SchemaLoader::load_registry(dir.path()).unwrap();
        assert_eq!(registry.require("Person").unwrap().table_name(), "people");
        assert!(registry.dangling_relations().is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            SchemaLoader::load_entities_from_directory(&missing),
            Err(EntitiesError::SchemaParsing(_))
        ));
    }

    #[test]
    fn test_validate_definition() {
        let valid: EntityDefinition = serde_yaml::from_str(PERSON).unwrap();
        assert!(SchemaLoader::validate_definition(&valid).is_ok());

        let mut no_fields = valid.clone();
        no_fields.fields.clear();
        assert!(SchemaLoader::validate_definition(&no_fields).is_err());

        let mut bad_field = valid.clone();
        bad_field.fields[1].name = "drop table".to_string();
        assert!(SchemaLoader::validate_definition(&bad_field).is_err());

        let mut bad_identifier = valid;
        bad_identifier.identifier = "uuid".to_string();
        assert!(SchemaLoader::validate_definition(&bad_identifier).is_err());
    }
}

use crate::field::{is_identifier, Field, FieldType};
use crate::rules::ConditionalFieldRule;
use crate::{EntitiesError, Result};
use async_trait::async_trait;
use authz::{AttributeId, DEFAULT_RESOURCE_ALIAS};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeMap, BTreeSet};

/// Entity definition
///
/// Fields listed in `output_attributes` are only readable when the resource
/// permission `<short_name>:output:<field>` grants it for the instance.
/// Fields are writable when listed in `input_fields`, or in
/// `input_attributes` and granted by `<short_name>:input:<field>`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityDefinition {
    pub short_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to the snake-cased short name
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default)]
    pub resource_alias: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub input_fields: Vec<String>,
    #[serde(default)]
    pub output_attributes: Vec<String>,
    #[serde(default)]
    pub input_attributes: Vec<String>,
    /// Field name to the short name of the related entity
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
    #[serde(default)]
    pub field_rules: Vec<ConditionalFieldRule>,
}

pub fn default_identifier() -> String {
    "id".to_string()
}

impl EntityDefinition {
    pub fn new(short_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            description: None,
            table: None,
            identifier: default_identifier(),
            resource_alias: None,
            fields: Vec::new(),
            input_fields: Vec::new(),
            output_attributes: Vec::new(),
            input_attributes: Vec::new(),
            relations: BTreeMap::new(),
            field_rules: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_input_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.input_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_output_attribute(mut self, field: impl Into<String>) -> Self {
        self.output_attributes.push(field.into());
        self
    }

    pub fn with_input_attribute(mut self, field: impl Into<String>) -> Self {
        self.input_attributes.push(field.into());
        self
    }

    pub fn with_relation(mut self, field: impl Into<String>, entity: impl Into<String>) -> Self {
        self.relations.insert(field.into(), entity.into());
        self
    }

    pub fn with_field_rule(mut self, rule: ConditionalFieldRule) -> Self {
        self.field_rules.push(rule);
        self
    }

    pub fn with_resource_alias(mut self, alias: impl Into<String>) -> Self {
        self.resource_alias = Some(alias.into());
        self
    }

    /// Get the table name for this entity
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.short_name))
    }

    pub fn resource_alias(&self) -> &str {
        self.resource_alias.as_deref().unwrap_or(DEFAULT_RESOURCE_ALIAS)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn identifier_field(&self) -> Option<&Field> {
        self.field(&self.identifier)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn relation(&self, field: &str) -> Option<&str> {
        self.relations.get(field).map(String::as_str)
    }

    /// Fields every user may read
    pub fn public_output_fields(&self) -> BTreeSet<String> {
        self.field_names()
            .filter(|name| !self.output_attributes.iter().any(|attribute| attribute == name))
            .map(str::to_string)
            .collect()
    }

    /// Paths usable in query filters and sorting: public, scalar, non-relation fields
    pub fn query_paths(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.field_type.is_queryable())
            .filter(|field| !self.relations.contains_key(&field.name))
            .filter(|field| !self.output_attributes.contains(&field.name))
            .map(|field| field.name.clone())
            .collect()
    }

    pub fn output_attribute_id(&self, field: &str) -> AttributeId {
        AttributeId::output(&self.short_name, field)
    }

    pub fn input_attribute_id(&self, field: &str) -> AttributeId {
        AttributeId::input(&self.short_name, field)
    }

    /// Id of an operation on this entity, e.g. `Article:get_collection`
    pub fn operation_id(&self, operation: &str) -> String {
        format!("{}:{}", self.short_name, operation)
    }

    /// The identifier of `instance` as a string, if present
    pub fn identifier_of(&self, instance: &JsonValue) -> Option<String> {
        match instance.get(&self.identifier)? {
            JsonValue::String(value) => Some(value.clone()),
            JsonValue::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Validate names and cross references
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.short_name) {
            return Err(EntitiesError::Validation(format!(
                "Invalid entity short name '{}'",
                self.short_name
            )));
        }
        if !is_identifier(&self.table_name()) {
            return Err(EntitiesError::Validation(format!(
                "Entity '{}': invalid table name '{}'",
                self.short_name,
                self.table_name()
            )));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            field.validate().map_err(|e| {
                EntitiesError::Validation(format!("Entity '{}': {}", self.short_name, e))
            })?;
            if !seen.insert(field.name.as_str()) {
                return Err(EntitiesError::Validation(format!(
                    "Entity '{}': duplicate field '{}'",
                    self.short_name, field.name
                )));
            }
        }

        if self.identifier_field().is_none() {
            return Err(EntitiesError::Validation(format!(
                "Entity '{}': identifier field '{}' is not declared",
                self.short_name, self.identifier
            )));
        }

        let references = self
            .input_fields
            .iter()
            .chain(&self.output_attributes)
            .chain(&self.input_attributes)
            .chain(self.relations.keys())
            .chain(self.field_rules.iter().flat_map(|rule| &rule.fields));
        for name in references {
            if self.field(name).is_none() {
                return Err(EntitiesError::Validation(format!(
                    "Entity '{}': reference to undeclared field '{}'",
                    self.short_name, name
                )));
            }
        }

        for (name, target) in &self.relations {
            if self.field(name).map(|field| field.field_type) != Some(FieldType::Json) {
                return Err(EntitiesError::Validation(format!(
                    "Entity '{}': relation field '{}' must have type json",
                    self.short_name, name
                )));
            }
            if target.is_empty() {
                return Err(EntitiesError::Validation(format!(
                    "Entity '{}': relation field '{}' has no target",
                    self.short_name, name
                )));
            }
        }

        Ok(())
    }
}

fn to_snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}

/// Trait for entity operations
#[async_trait]
pub trait Entity: Send + Sync {
    /// Get the entity definition
    fn definition(&self) -> &EntityDefinition;

    /// Create the database tables for this entity
    async fn create_tables(&self, pool: &Pool<Sqlite>) -> Result<()>;

    /// Drop the database tables for this entity
    async fn drop_tables(&self, pool: &Pool<Sqlite>) -> Result<()>;

    /// Check if the entity tables exist
    async fn tables_exist(&self, pool: &Pool<Sqlite>) -> Result<bool>;
}

/// Generic entity implementation
pub struct GenericEntity {
    definition: EntityDefinition,
}

impl GenericEntity {
    pub fn new(definition: EntityDefinition) -> Self {
        Self { definition }
    }

    /// Generate SQL for creating the main entity table
    fn generate_create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .definition
            .fields
            .iter()
            .map(|field| {
                if field.name == self.definition.identifier {
                    // INTEGER PRIMARY KEY aliases the rowid and autoincrements
                    format!("{} {} PRIMARY KEY", field.name, field.field_type.sql_type())
                } else {
                    field.to_sql_column()
                }
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.definition.table_name(),
            columns.join(",\n    ")
        )
    }

    /// Execute raw SQL on the pool
    async fn execute_raw(pool: &Pool<Sqlite>, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| EntitiesError::SqlExecution(e.to_string()))?;
        Ok(())
    }

    /// Check if a table exists
    async fn table_exists(pool: &Pool<Sqlite>, table_name: &str) -> Result<bool> {
        let query = r#"
            SELECT COUNT(*) as count
            FROM sqlite_master
            WHERE type='table' AND name=?
        "#;

        let result: (i32,) = sqlx::query_as(query)
            .bind(table_name)
            .fetch_one(pool)
            .await?;

        Ok(result.0 > 0)
    }
}

#[async_trait]
impl Entity for GenericEntity {
    fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    async fn create_tables(&self, pool: &Pool<Sqlite>) -> Result<()> {
        self.definition.validate()?;
        Self::execute_raw(pool, &self.generate_create_table_sql()).await
    }

    async fn drop_tables(&self, pool: &Pool<Sqlite>) -> Result<()> {
        let drop_sql = format!("DROP TABLE IF EXISTS {}", self.definition.table_name());
        Self::execute_raw(pool, &drop_sql).await
    }

    async fn tables_exist(&self, pool: &Pool<Sqlite>) -> Result<bool> {
        Self::table_exists(pool, &self.definition.table_name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    fn article() -> EntityDefinition {
        EntityDefinition::new("BlogArticle")
            .with_field(Field::new("id", FieldType::Integer))
            .with_field(Field::new("title", FieldType::Text).required(true))
            .with_field(Field::new("notes", FieldType::Text))
            .with_field(Field::new("author", FieldType::Json))
            .with_output_attribute("notes")
            .with_relation("author", "Person")
            .with_input_fields(["title"])
    }

    #[test]
    fn test_entity_table_name() {
        let mut definition = article();
        assert_eq!(definition.table_name(), "blog_article");
        definition.table = Some("articles".into());
        assert_eq!(definition.table_name(), "articles");
    }

    #[test]
    fn test_field_sets() {
        let definition = article();
        assert_eq!(
            definition.public_output_fields(),
            ["author", "id", "title"].map(String::from).into()
        );
        assert_eq!(definition.query_paths(), vec!["id", "title"]);
        assert_eq!(definition.output_attribute_id("notes").to_string(), "BlogArticle:output:notes");
        assert_eq!(definition.operation_id("get_item"), "BlogArticle:get_item");
        assert_eq!(definition.resource_alias(), "resource");
    }

    #[test]
    fn test_identifier_of() {
        let definition = article();
        assert_eq!(definition.identifier_of(&json!({"id": 7})), Some("7".into()));
        assert_eq!(definition.identifier_of(&json!({"id": "a"})), Some("a".into()));
        assert_eq!(definition.identifier_of(&json!({"title": "x"})), None);
    }

    #[test]
    fn test_validate() {
        assert!(article().validate().is_ok());

        let missing_identifier = EntityDefinition::new("Thing").with_field(Field::new("name", FieldType::Text));
        assert!(missing_identifier.validate().is_err());

        let undeclared = article().with_output_attribute("secret");
        assert!(undeclared.validate().is_err());

        let scalar_relation = article().with_relation("title", "Person");
        assert!(scalar_relation.validate().is_err());

        let duplicate = article().with_field(Field::new("title", FieldType::Text));
        assert!(duplicate.validate().is_err());

        assert!(EntityDefinition::new("bad name").validate().is_err());
    }

    #[test]
    fn test_generate_create_table_sql() {
        let entity = GenericEntity::new(article());
        assert_eq!(
            entity.generate_create_table_sql(),
            "CREATE TABLE IF NOT EXISTS blog_article (\n    id INTEGER PRIMARY KEY,\n    title TEXT NOT NULL,\n    notes TEXT,\n    author TEXT\n)"
        );
    }

    #[tokio::test]
    async fn test_create_and_drop_tables() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let entity = GenericEntity::new(article());

        assert!(!entity.tables_exist(&pool).await.unwrap());
        entity.create_tables(&pool).await.unwrap();
        assert!(entity.tables_exist(&pool).await.unwrap());
        entity.drop_tables(&pool).await.unwrap();
        assert!(!entity.tables_exist(&pool).await.unwrap());
    }
}

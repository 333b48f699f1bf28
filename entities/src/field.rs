use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Storage type of an entity field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
    /// Nested structure stored as JSON text; relations use this type
    Json,
}

impl FieldType {
    /// Get the SQL type for this field type
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text | FieldType::Datetime => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Boolean => "INTEGER", // SQLite uses 0/1 for boolean
            FieldType::Json => "TEXT",
        }
    }

    /// Whether `value` can be stored in a column of this type
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (_, JsonValue::Null) => true,
            (FieldType::Text | FieldType::Datetime, JsonValue::String(_)) => true,
            (FieldType::Integer, JsonValue::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Float, JsonValue::Number(_)) => true,
            (FieldType::Boolean, JsonValue::Bool(_)) => true,
            (FieldType::Json, _) => true,
            _ => false,
        }
    }

    /// Whether filter conditions and sorting may address this field
    pub fn is_queryable(&self) -> bool {
        !matches!(self, FieldType::Json)
    }
}

/// Field definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            description: None,
        }
    }

    /// Set the field as required
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Get the SQL column definition for this field
    pub fn to_sql_column(&self) -> String {
        let mut column_def = format!("{} {}", self.name, self.field_type.sql_type());
        if self.required {
            column_def.push_str(" NOT NULL");
        }
        column_def
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_identifier(&self.name) {
            return Err(format!(
                "Field name '{}' must start with a letter or underscore and contain only letters, digits and underscores",
                self.name
            ));
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_column() {
        assert_eq!(
            Field::new("title", FieldType::Text).required(true).to_sql_column(),
            "title TEXT NOT NULL"
        );
        assert_eq!(Field::new("views", FieldType::Integer).to_sql_column(), "views INTEGER");
        assert_eq!(Field::new("published", FieldType::Boolean).to_sql_column(), "published INTEGER");
        assert_eq!(Field::new("score", FieldType::Float).to_sql_column(), "score REAL");
    }

    #[test]
    fn test_accepts() {
        assert!(FieldType::Text.accepts(&json!("a")));
        assert!(FieldType::Text.accepts(&JsonValue::Null));
        assert!(!FieldType::Text.accepts(&json!(1)));
        assert!(FieldType::Integer.accepts(&json!(3)));
        assert!(!FieldType::Integer.accepts(&json!(3.5)));
        assert!(FieldType::Float.accepts(&json!(3)));
        assert!(!FieldType::Boolean.accepts(&json!("true")));
        assert!(FieldType::Json.accepts(&json!({"a": [1]})));
    }

    #[test]
    fn test_validate_name() {
        assert!(Field::new("created_at", FieldType::Datetime).validate().is_ok());
        assert!(Field::new("_x1", FieldType::Text).validate().is_ok());
        assert!(Field::new("1x", FieldType::Text).validate().is_err());
        assert!(Field::new("a-b", FieldType::Text).validate().is_err());
        assert!(Field::new("", FieldType::Text).validate().is_err());
    }

    #[test]
    fn test_deserialize() {
        let field: Field = serde_yaml::from_str("name: title\ntype: text\nrequired: true\n").unwrap();
        assert_eq!(field, Field::new("title", FieldType::Text).required(true));
    }
}

use crate::query_helper::QueryHelper;
use crate::{Database, DatabaseError, Result};
use entities::{EntityDefinition, FieldType};
use query::filter::ConditionNode;
use query::{Filter, Node, Pagination, Sort};
use serde_json::{Map, Number, Value as JsonValue};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

/// Storage of the instances of one entity in its table
pub struct EntityStorage<'a> {
    db: &'a Database,
    definition: &'a EntityDefinition,
    helper: QueryHelper,
}

impl<'a> EntityStorage<'a> {
    /// Create a new EntityStorage instance
    pub fn new(db: &'a Database, definition: &'a EntityDefinition) -> Self {
        Self {
            db,
            definition,
            helper: QueryHelper::new(),
        }
    }

    /// Insert a new instance and return it as stored
    ///
    /// Text identifiers that are not supplied are generated (ULID); integer
    /// identifiers are assigned by SQLite.
    pub async fn create(&self, values: &Map<String, JsonValue>) -> Result<JsonValue> {
        let mut columns = Vec::new();
        let mut bound = Vec::new();

        for field in &self.definition.fields {
            let value = match values.get(&field.name) {
                Some(value) if !value.is_null() => value.clone(),
                _ if field.name == self.definition.identifier && field.field_type == FieldType::Text => {
                    JsonValue::String(ulid::Ulid::new().to_string())
                }
                _ if field.required && field.name != self.definition.identifier => {
                    return Err(DatabaseError::Validation(format!(
                        "Field '{}.{}' is required",
                        self.definition.short_name, field.name
                    )));
                }
                _ => continue,
            };
            if !field.field_type.accepts(&value) {
                return Err(DatabaseError::Validation(format!(
                    "Field '{}.{}' does not accept {}",
                    self.definition.short_name, field.name, value
                )));
            }
            columns.push(field.name.as_str());
            bound.push((field.field_type, value));
        }

        if let Some(unknown) = values.keys().find(|name| self.definition.field(name).is_none()) {
            return Err(DatabaseError::Validation(format!(
                "Entity '{}' has no field '{}'",
                self.definition.short_name, unknown
            )));
        }

        let table = self.definition.table_name();
        let mut builder = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {} ", table));
        if columns.is_empty() {
            builder.push("DEFAULT VALUES");
        } else {
            builder.push(format!("({}) VALUES (", columns.join(", ")));
            for (i, (field_type, value)) in bound.into_iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_column_value(&mut builder, field_type, value)?;
            }
            builder.push(")");
        }

        debug!("Executing SQL: {}", builder.sql());
        let result = builder.build().execute(self.db.pool()).await?;

        let id = match values.get(&self.definition.identifier) {
            Some(JsonValue::String(id)) => id.clone(),
            Some(JsonValue::Number(id)) => id.to_string(),
            _ => self.generated_identifier(result.last_insert_rowid()).await?,
        };
        info!("Created {} with id: {}", self.definition.short_name, id);

        self.get(&id)
            .await?
            .ok_or_else(|| DatabaseError::EntityNotFound(format!("{} with id: {}", self.definition.short_name, id)))
    }

    /// Get an instance by identifier
    pub async fn get(&self, id: &str) -> Result<Option<JsonValue>> {
        let mut builder = self.select();
        builder.push(format!(" WHERE {} = ", self.definition.identifier));
        builder.push_bind(id.to_string());

        let row = builder.build().fetch_optional(self.db.pool()).await?;
        row.map(|row| self.decode_row(&row)).transpose()
    }

    /// List instances matching `filter`, ordered by `sort`, optionally paginated
    pub async fn list(
        &self,
        filter: &Filter,
        sort: &Sort,
        pagination: Option<&Pagination>,
    ) -> Result<Vec<JsonValue>> {
        let filter = self.coerce_filter(filter.clone());
        let mut builder = self.select();
        self.helper.add_filter(&mut builder, &filter)?;
        self.helper.add_sort(&mut builder, sort)?;
        if let Some(pagination) = pagination {
            self.helper.add_pagination(&mut builder, pagination);
        }

        debug!("Executing SQL: {}", builder.sql());
        let rows = builder.build().fetch_all(self.db.pool()).await?;
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// Count instances matching `filter`
    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        let filter = self.coerce_filter(filter.clone());
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {}", self.definition.table_name()));
        self.helper.add_filter(&mut builder, &filter)?;

        let count: i64 = builder.build().fetch_one(self.db.pool()).await?.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn select(&self) -> QueryBuilder<'static, Sqlite> {
        let columns: Vec<&str> = self.definition.field_names().collect();
        QueryBuilder::new(format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            self.definition.table_name()
        ))
    }

    async fn generated_identifier(&self, rowid: i64) -> Result<String> {
        let sql = format!(
            "SELECT {} FROM {} WHERE rowid = ?",
            self.definition.identifier,
            self.definition.table_name()
        );
        let row = sqlx::query(&sql).bind(rowid).fetch_one(self.db.pool()).await?;
        match self.decode_column(&row, 0, self.identifier_type())? {
            JsonValue::String(id) => Ok(id),
            JsonValue::Number(id) => Ok(id.to_string()),
            other => Err(DatabaseError::Validation(format!(
                "Unexpected identifier value {} for {}",
                other, self.definition.short_name
            ))),
        }
    }

    fn identifier_type(&self) -> FieldType {
        self.definition
            .identifier_field()
            .map(|field| field.field_type)
            .unwrap_or(FieldType::Text)
    }

    /// Query string values arrive as text; convert them for numeric and boolean columns
    fn coerce_filter(&self, filter: Filter) -> Filter {
        filter.replace_conditions(|condition| {
            let field_type = self
                .definition
                .field(condition.path())
                .map(|field| field.field_type);
            let Some(field_type) = field_type else {
                return Node::Condition(condition);
            };
            let value = match condition.value() {
                JsonValue::Array(items) => {
                    JsonValue::Array(items.iter().map(|item| coerce_value(field_type, item)).collect())
                }
                value => coerce_value(field_type, value),
            };
            match ConditionNode::new(condition.path(), condition.operator(), value) {
                Ok(coerced) => Node::Condition(coerced),
                Err(_) => Node::Condition(condition),
            }
        })
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<JsonValue> {
        let mut object = Map::new();
        for (i, field) in self.definition.fields.iter().enumerate() {
            object.insert(field.name.clone(), self.decode_column(row, i, field.field_type)?);
        }
        Ok(JsonValue::Object(object))
    }

    fn decode_column(&self, row: &SqliteRow, index: usize, field_type: FieldType) -> Result<JsonValue> {
        let value = match field_type {
            FieldType::Text | FieldType::Datetime => row
                .try_get::<Option<String>, _>(index)?
                .map(JsonValue::String),
            FieldType::Integer => row
                .try_get::<Option<i64>, _>(index)?
                .map(|n| JsonValue::Number(Number::from(n))),
            FieldType::Float => row
                .try_get::<Option<f64>, _>(index)?
                .and_then(Number::from_f64)
                .map(JsonValue::Number),
            FieldType::Boolean => row.try_get::<Option<bool>, _>(index)?.map(JsonValue::Bool),
            FieldType::Json => match row.try_get::<Option<String>, _>(index)? {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            },
        };
        Ok(value.unwrap_or(JsonValue::Null))
    }
}

fn coerce_value(field_type: FieldType, value: &JsonValue) -> JsonValue {
    let JsonValue::String(text) = value else {
        return value.clone();
    };
    let text = text.trim();
    match field_type {
        FieldType::Integer => text
            .parse::<i64>()
            .map(|n| JsonValue::Number(Number::from(n)))
            .unwrap_or_else(|_| value.clone()),
        FieldType::Float => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| value.clone()),
        FieldType::Boolean => match text {
            "true" | "1" => JsonValue::Bool(true),
            "false" | "0" => JsonValue::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn push_column_value(builder: &mut QueryBuilder<'_, Sqlite>, field_type: FieldType, value: JsonValue) -> Result<()> {
    match (field_type, value) {
        (FieldType::Json, value) => {
            builder.push_bind(serde_json::to_string(&value)?);
        }
        (_, JsonValue::String(s)) => {
            builder.push_bind(s);
        }
        (_, JsonValue::Bool(b)) => {
            builder.push_bind(b);
        }
        (_, JsonValue::Number(n)) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        (_, value) => {
            builder.push_bind(value.to_string());
        }
    }
    Ok(())
}

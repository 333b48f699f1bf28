//! Translation of filters, sorts and pages into parameterized SQL.
//!
//! Every operand is bound as a parameter; only column identifiers are
//! written into the SQL text, and those must match `[A-Za-z_][A-Za-z0-9_]*`.
//! Comparisons on a NULL column evaluate to false (not NULL), so negated
//! groups select the same rows as [`Filter::apply`] does in memory.

use crate::{DatabaseError, Result};
use entities::is_identifier;
use query::filter::{ConditionNode, LogicalKind, LogicalNode};
use query::{Filter, Node, Operator, Pagination, Sort};
use serde_json::Value as JsonValue;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct QueryHelper {
    table_alias: Option<String>,
    columns: HashMap<String, String>,
}

impl QueryHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Qualify every column with `alias.`
    pub fn with_table_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    /// Map an attribute path to a column whose name differs from the path
    pub fn map_path(mut self, path: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.insert(path.into(), column.into());
        self
    }

    pub fn column(&self, path: &str) -> Result<String> {
        let column = self.columns.get(path).map(String::as_str).unwrap_or(path);
        if !is_identifier(column) {
            return Err(DatabaseError::InvalidFilter(format!(
                "'{}' is not a valid column name",
                column
            )));
        }
        match &self.table_alias {
            Some(alias) if !is_identifier(alias) => Err(DatabaseError::InvalidFilter(format!(
                "'{}' is not a valid table alias",
                alias
            ))),
            Some(alias) => Ok(format!("{}.{}", alias, column)),
            None => Ok(column.to_string()),
        }
    }

    /// Append ` WHERE <filter>` unless the filter is empty
    pub fn add_filter(&self, builder: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) -> Result<()> {
        if filter.is_empty() {
            return Ok(());
        }
        builder.push(" WHERE ");
        self.push_logical(builder, filter.root())
    }

    pub fn push_node_expression(&self, builder: &mut QueryBuilder<'_, Sqlite>, node: &Node) -> Result<()> {
        match node {
            Node::Constant(true) => {
                builder.push("1 = 1");
            }
            Node::Constant(false) => {
                builder.push("1 = 0");
            }
            Node::Logical(logical) => self.push_logical(builder, logical)?,
            Node::Condition(condition) => self.push_condition(builder, condition)?,
        }
        Ok(())
    }

    /// Append ` ORDER BY ...` unless the sort is empty
    pub fn add_sort(&self, builder: &mut QueryBuilder<'_, Sqlite>, sort: &Sort) -> Result<()> {
        if sort.is_empty() {
            return Ok(());
        }
        builder.push(" ORDER BY ");
        for (i, field) in sort.fields().iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(self.column(&field.path)?);
            builder.push(" ");
            builder.push(field.direction.as_sql());
        }
        Ok(())
    }

    pub fn add_pagination(&self, builder: &mut QueryBuilder<'_, Sqlite>, pagination: &Pagination) {
        builder.push(" LIMIT ");
        builder.push_bind(to_i64(pagination.limit()));
        builder.push(" OFFSET ");
        builder.push_bind(to_i64(pagination.offset()));
    }

    fn push_logical(&self, builder: &mut QueryBuilder<'_, Sqlite>, node: &LogicalNode) -> Result<()> {
        let children = node.children();
        match node.kind() {
            LogicalKind::Not if children.len() != 1 => {
                return Err(DatabaseError::InvalidFilter(format!(
                    "NOT group must have exactly one child, found {}",
                    children.len()
                )));
            }
            LogicalKind::And if children.is_empty() => {
                builder.push("1 = 1");
            }
            LogicalKind::Or if children.is_empty() => {
                builder.push("1 = 0");
            }
            LogicalKind::Not => {
                builder.push("NOT ");
                self.push_joined(builder, children, " AND ")?;
            }
            LogicalKind::And => self.push_joined(builder, children, " AND ")?,
            LogicalKind::Or => self.push_joined(builder, children, " OR ")?,
        }
        Ok(())
    }

    fn push_joined(&self, builder: &mut QueryBuilder<'_, Sqlite>, children: &[Node], separator: &str) -> Result<()> {
        builder.push("(");
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                builder.push(separator);
            }
            self.push_node_expression(builder, child)?;
        }
        builder.push(")");
        Ok(())
    }

    fn push_condition(&self, builder: &mut QueryBuilder<'_, Sqlite>, condition: &ConditionNode) -> Result<()> {
        let column = self.column(condition.path())?;
        let value = condition.value();

        if condition.operator() == Operator::IsNull {
            builder.push(format!("{} IS NULL", column));
            return Ok(());
        }

        builder.push(format!("({} IS NOT NULL AND ", column));
        match condition.operator() {
            Operator::Equals => {
                builder.push(format!("{} = ", column));
                push_bind_value(builder, value);
            }
            Operator::GreaterThanOrEqual => {
                builder.push(format!("{} >= ", column));
                push_bind_value(builder, value);
            }
            Operator::LessThanOrEqual => {
                builder.push(format!("{} <= ", column));
                push_bind_value(builder, value);
            }
            Operator::InArray => {
                let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                builder.push(format!("{} IN (", column));
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    push_bind_value(builder, item);
                }
                builder.push(")");
            }
            Operator::Contains => {
                builder.push(format!("INSTR({}, ", column));
                push_bind_value(builder, value);
                builder.push(") > 0");
            }
            operator => {
                let needle = escape_like(&value.as_str().unwrap_or_default().to_lowercase());
                let pattern = match operator {
                    Operator::IContains => format!("%{}%", needle),
                    Operator::IStartsWith => format!("{}%", needle),
                    Operator::IEndsWith => format!("%{}", needle),
                    _ => needle,
                };
                builder.push(format!("LOWER({}) LIKE ", column));
                builder.push_bind(pattern);
                builder.push(" ESCAPE '\\'");
            }
        }
        builder.push(")");
        Ok(())
    }
}

/// SQLite has no boolean type; booleans bind as 0/1
fn push_bind_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &JsonValue) {
    match value {
        JsonValue::String(s) => builder.push_bind(s.clone()),
        JsonValue::Bool(b) => builder.push_bind(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => builder.push_bind(i),
            None => builder.push_bind(n.as_f64().unwrap_or_default()),
        },
        JsonValue::Null => builder.push_bind(None::<String>),
        other => builder.push_bind(other.to_string()),
    };
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

use super::node::{ConditionNode, LogicalKind, LogicalNode, Node};
use super::operator::Operator;
use super::Filter;
use crate::{FilterError, Result};
use serde_json::Value as JsonValue;

/// Fluent construction of filter trees.
///
/// `and()`, `or()` and `not()` open a nested group which receives all
/// following nodes until the matching `end()`. Errors (invalid conditions,
/// unbalanced `end()`) are collected and reported by [`create_filter`].
///
/// ```rust
/// use query::filter::FilterTreeBuilder;
///
/// let filter = FilterTreeBuilder::create()
///     .i_contains("content", "bar")
///     .or()
///         .equals("number", 3)
///         .is_null("secret")
///     .end()
///     .create_filter()
///     .unwrap();
///
/// assert!(filter.apply(&serde_json::json!({"content": "foo bar", "number": 3})));
/// ```
///
/// [`create_filter`]: FilterTreeBuilder::create_filter
#[derive(Debug)]
pub struct FilterTreeBuilder {
    stack: Vec<LogicalNode>,
    error: Option<FilterError>,
}

impl Default for FilterTreeBuilder {
    fn default() -> Self {
        Self::create()
    }
}

impl FilterTreeBuilder {
    pub fn create() -> Self {
        Self {
            stack: vec![LogicalNode::new(LogicalKind::And)],
            error: None,
        }
    }

    pub fn and(self) -> Self {
        self.open(LogicalKind::And)
    }

    pub fn or(self) -> Self {
        self.open(LogicalKind::Or)
    }

    pub fn not(self) -> Self {
        self.open(LogicalKind::Not)
    }

    /// Close the innermost open group and return to its parent
    pub fn end(mut self) -> Self {
        if self.stack.len() <= 1 {
            self.record(FilterError::Builder(
                "end() called without an open group".to_string(),
            ));
            return self;
        }
        if let Some(node) = self.stack.pop() {
            self.current().append_child(node);
        }
        self
    }

    pub fn append_child(mut self, node: impl Into<Node>) -> Self {
        self.current().append_child(node);
        self
    }

    pub fn condition(mut self, path: impl Into<String>, operator: Operator, value: JsonValue) -> Self {
        match ConditionNode::new(path, operator, value) {
            Ok(condition) => {
                self.current().append_child(condition);
            }
            Err(e) => self.record(e),
        }
        self
    }

    pub fn equals(self, path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.condition(path, Operator::Equals, value.into())
    }

    pub fn i_equals(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition(path, Operator::IEquals, JsonValue::String(value.into()))
    }

    pub fn contains(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition(path, Operator::Contains, JsonValue::String(value.into()))
    }

    pub fn i_contains(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition(path, Operator::IContains, JsonValue::String(value.into()))
    }

    pub fn i_starts_with(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition(path, Operator::IStartsWith, JsonValue::String(value.into()))
    }

    pub fn i_ends_with(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition(path, Operator::IEndsWith, JsonValue::String(value.into()))
    }

    pub fn greater_than_or_equal(self, path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.condition(path, Operator::GreaterThanOrEqual, value.into())
    }

    pub fn less_than_or_equal(self, path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.condition(path, Operator::LessThanOrEqual, value.into())
    }

    pub fn in_array<V: Into<JsonValue>>(
        self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.condition(path, Operator::InArray, JsonValue::Array(values))
    }

    pub fn is_null(self, path: impl Into<String>) -> Self {
        self.condition(path, Operator::IsNull, JsonValue::Null)
    }

    /// Finish construction and validate the resulting tree
    pub fn create_filter(mut self) -> Result<Filter> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.stack.len() != 1 {
            return Err(FilterError::Builder(format!(
                "{} group(s) left open",
                self.stack.len() - 1
            )));
        }

        let root = self
            .stack
            .pop()
            .ok_or_else(|| FilterError::Builder("missing root node".to_string()))?;
        let filter = Filter::from_root(root);
        filter.validate()?;
        Ok(filter)
    }

    fn open(mut self, kind: LogicalKind) -> Self {
        self.stack.push(LogicalNode::new(kind));
        self
    }

    fn current(&mut self) -> &mut LogicalNode {
        if self.stack.is_empty() {
            self.stack.push(LogicalNode::new(LogicalKind::And));
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn record(&mut self, error: FilterError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

//! Filter tree nodes.
//!
//! A filter is a tree of owned [`Node`] values. Logical nodes own their
//! children directly; there are no parent references, so navigation during
//! construction is done by [`FilterTreeBuilder`](super::builder::FilterTreeBuilder)
//! with an explicit stack.

use super::operator::Operator;
use crate::{FilterError, Result};
use serde_json::{Map, Value as JsonValue};

/// Kind of a logical node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalKind {
    And,
    Or,
    Not,
}

impl LogicalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalKind::And => "and",
            LogicalKind::Or => "or",
            LogicalKind::Not => "not",
        }
    }

    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "and" => Some(LogicalKind::And),
            "or" => Some(LogicalKind::Or),
            "not" => Some(LogicalKind::Not),
            _ => None,
        }
    }
}

/// A single field comparison
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionNode {
    path: String,
    operator: Operator,
    value: JsonValue,
}

impl ConditionNode {
    /// Create a condition, validating the value against the operator.
    pub fn new(path: impl Into<String>, operator: Operator, value: JsonValue) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(FilterError::ConditionPathMissing(String::new()));
        }
        operator.validate_value(&value)?;

        Ok(Self {
            path,
            operator,
            value,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &JsonValue {
        &self.value
    }

    /// Evaluate the condition against a JSON row
    pub fn apply(&self, row: &JsonValue) -> bool {
        self.operator.evaluate(lookup_path(row, &self.path), &self.value)
    }

    pub fn to_array(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert("path".to_string(), JsonValue::String(self.path.clone()));
        map.insert(
            "operator".to_string(),
            JsonValue::String(self.operator.as_str().to_string()),
        );
        map.insert("value".to_string(), self.value.clone());
        JsonValue::Object(map)
    }

    fn from_array(map: &Map<String, JsonValue>) -> Result<Self> {
        let path = map
            .get("path")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| FilterError::ConditionPathMissing(String::new()))?;
        let operator = match map.get("operator") {
            Some(JsonValue::String(name)) => name.parse()?,
            Some(other) => {
                return Err(FilterError::ConditionOperatorUndefined(other.to_string()))
            }
            None => Operator::Equals,
        };
        let value = map.get("value").cloned().unwrap_or(JsonValue::Null);

        Self::new(path, operator, value)
    }
}

/// An And, Or or Not node with ordered children
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalNode {
    kind: LogicalKind,
    children: Vec<Node>,
}

impl LogicalNode {
    pub fn new(kind: LogicalKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: LogicalKind, children: Vec<Node>) -> Self {
        Self { kind, children }
    }

    pub fn kind(&self) -> LogicalKind {
        self.kind
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn into_children(self) -> Vec<Node> {
        self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn append_child(&mut self, node: impl Into<Node>) -> &mut Self {
        self.children.push(node.into());
        self
    }

    /// Check the structural constraints of this node and its subtree.
    ///
    /// A Not node needs exactly one child. And/Or nodes need at least one
    /// child unless `allow_empty_groups` is set.
    pub fn validate(&self, allow_empty_groups: bool) -> Result<()> {
        match self.kind {
            LogicalKind::Not if self.children.len() != 1 => {
                return Err(FilterError::InvalidTree(format!(
                    "'not' node must have exactly one child, found {}",
                    self.children.len()
                )));
            }
            LogicalKind::And | LogicalKind::Or if self.children.is_empty() && !allow_empty_groups => {
                return Err(FilterError::InvalidTree(format!(
                    "'{}' node must not be empty",
                    self.kind.as_str()
                )));
            }
            _ => {}
        }

        self.validate_children(allow_empty_groups)
    }

    pub(crate) fn validate_children(&self, allow_empty_groups: bool) -> Result<()> {
        for child in &self.children {
            child.validate(allow_empty_groups)?;
        }
        Ok(())
    }

    pub fn apply(&self, row: &JsonValue) -> bool {
        match self.kind {
            LogicalKind::And => self.children.iter().all(|child| child.apply(row)),
            LogicalKind::Or => self.children.iter().any(|child| child.apply(row)),
            LogicalKind::Not => !self.children.iter().all(|child| child.apply(row)),
        }
    }

    /// Post-order rewrite: splice And-in-And and Or-in-Or, drop Not-Not pairs.
    pub fn simplify_recursively(&mut self) {
        let children = std::mem::take(&mut self.children);
        let mut simplified = Vec::with_capacity(children.len());

        for mut child in children {
            child.simplify_recursively();
            match cancel_double_negation(child) {
                Node::Logical(inner) if inner.kind == self.kind && self.kind != LogicalKind::Not => {
                    simplified.extend(inner.children);
                }
                other => simplified.push(other),
            }
        }

        self.children = simplified;
    }

    /// Nested map representation with children keyed by `{type}_{index}`
    pub fn to_array(&self) -> JsonValue {
        let mut map = Map::new();
        for (index, child) in self.children.iter().enumerate() {
            map.insert(format!("{}_{}", child.type_name(), index), child.to_array());
        }
        JsonValue::Object(map)
    }

    /// Rebuild a node of the given kind from its `to_array()` representation
    pub fn from_array(kind: LogicalKind, value: &JsonValue) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            FilterError::InvalidTree(format!(
                "'{}' node representation must be a map",
                kind.as_str()
            ))
        })?;

        let mut indexed = Vec::with_capacity(map.len());
        for (key, child) in map {
            let (type_name, index) = key
                .rsplit_once('_')
                .and_then(|(name, index)| Some((name, index.parse::<usize>().ok()?)))
                .ok_or_else(|| FilterError::InvalidTree(format!("invalid child key '{}'", key)))?;

            let node = match LogicalKind::from_type_name(type_name) {
                Some(child_kind) => Node::Logical(LogicalNode::from_array(child_kind, child)?),
                None if type_name.is_empty() => match child {
                    JsonValue::Bool(constant) => Node::Constant(*constant),
                    JsonValue::Object(condition) => {
                        Node::Condition(ConditionNode::from_array(condition)?)
                    }
                    _ => {
                        return Err(FilterError::InvalidTree(format!(
                            "invalid leaf node '{}'",
                            key
                        )))
                    }
                },
                None => {
                    return Err(FilterError::InvalidTree(format!(
                        "unknown node type '{}'",
                        type_name
                    )))
                }
            };
            indexed.push((index, node));
        }
        indexed.sort_by_key(|(index, _)| *index);

        Ok(Self::with_children(
            kind,
            indexed.into_iter().map(|(_, node)| node).collect(),
        ))
    }

    pub(crate) fn visit_conditions<'a>(&'a self, visitor: &mut impl FnMut(&'a ConditionNode)) {
        for child in &self.children {
            child.visit_conditions(visitor);
        }
    }

    pub(crate) fn replace_conditions(self, replace: &mut impl FnMut(ConditionNode) -> Node) -> Self {
        Self {
            kind: self.kind,
            children: self
                .children
                .into_iter()
                .map(|child| child.replace_conditions(replace))
                .collect(),
        }
    }
}

/// A node of the filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Condition(ConditionNode),
    Logical(LogicalNode),
    /// Statically known result, e.g. a condition the user may not filter on
    Constant(bool),
}

impl Node {
    pub fn condition(path: impl Into<String>, operator: Operator, value: JsonValue) -> Result<Self> {
        ConditionNode::new(path, operator, value).map(Node::Condition)
    }

    pub fn and(children: Vec<Node>) -> Self {
        Node::Logical(LogicalNode::with_children(LogicalKind::And, children))
    }

    pub fn or(children: Vec<Node>) -> Self {
        Node::Logical(LogicalNode::with_children(LogicalKind::Or, children))
    }

    pub fn not(child: Node) -> Self {
        Node::Logical(LogicalNode::with_children(LogicalKind::Not, vec![child]))
    }

    /// Type prefix used in `to_array()` keys; empty for leaves
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Logical(node) => node.kind.as_str(),
            Node::Condition(_) | Node::Constant(_) => "",
        }
    }

    pub fn validate(&self, allow_empty_groups: bool) -> Result<()> {
        match self {
            Node::Logical(node) => node.validate(allow_empty_groups),
            Node::Condition(_) | Node::Constant(_) => Ok(()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate(false).is_ok()
    }

    pub fn apply(&self, row: &JsonValue) -> bool {
        match self {
            Node::Condition(condition) => condition.apply(row),
            Node::Logical(node) => node.apply(row),
            Node::Constant(constant) => *constant,
        }
    }

    pub fn simplify_recursively(&mut self) {
        if let Node::Logical(node) = self {
            node.simplify_recursively();
        }
    }

    pub fn to_array(&self) -> JsonValue {
        match self {
            Node::Condition(condition) => condition.to_array(),
            Node::Logical(node) => node.to_array(),
            Node::Constant(constant) => JsonValue::Bool(*constant),
        }
    }

    fn visit_conditions<'a>(&'a self, visitor: &mut impl FnMut(&'a ConditionNode)) {
        match self {
            Node::Condition(condition) => visitor(condition),
            Node::Logical(node) => node.visit_conditions(visitor),
            Node::Constant(_) => {}
        }
    }

    fn replace_conditions(self, replace: &mut impl FnMut(ConditionNode) -> Node) -> Self {
        match self {
            Node::Condition(condition) => replace(condition),
            Node::Logical(node) => Node::Logical(node.replace_conditions(replace)),
            constant => constant,
        }
    }
}

impl From<ConditionNode> for Node {
    fn from(condition: ConditionNode) -> Self {
        Node::Condition(condition)
    }
}

impl From<LogicalNode> for Node {
    fn from(node: LogicalNode) -> Self {
        Node::Logical(node)
    }
}

fn cancel_double_negation(node: Node) -> Node {
    match node {
        Node::Logical(mut outer) if outer.kind == LogicalKind::Not && outer.children.len() == 1 => {
            match outer.children.pop() {
                Some(Node::Logical(mut inner))
                    if inner.kind == LogicalKind::Not && inner.children.len() == 1 =>
                {
                    match inner.children.pop() {
                        Some(grandchild) => cancel_double_negation(grandchild),
                        None => Node::Logical(inner),
                    }
                }
                Some(child) => {
                    outer.children.push(child);
                    Node::Logical(outer)
                }
                None => Node::Logical(outer),
            }
        }
        other => other,
    }
}

/// Look up a (possibly dotted) path in a JSON row.
///
/// A literal key containing dots wins over nested traversal.
pub(crate) fn lookup_path<'a>(row: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if let Some(value) = row.get(path) {
        return Some(value);
    }
    path.split('.')
        .try_fold(row, |current, segment| current.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(path: &str, value: &str) -> Node {
        Node::condition(path, Operator::Equals, json!(value)).unwrap()
    }

    #[test]
    fn test_condition_requires_path() {
        assert!(matches!(
            ConditionNode::new("", Operator::Equals, json!(1)),
            Err(FilterError::ConditionPathMissing(_))
        ));
    }

    #[test]
    fn test_not_node_validity() {
        let empty_not = LogicalNode::new(LogicalKind::Not);
        let err = empty_not.validate(false).unwrap_err();
        assert!(!err.to_string().is_empty());

        let two_children = LogicalNode::with_children(
            LogicalKind::Not,
            vec![cond("a", "1"), cond("b", "2")],
        );
        assert!(two_children.validate(false).is_err());

        assert!(Node::not(cond("a", "1")).is_valid());
    }

    #[test]
    fn test_empty_groups() {
        let empty_or = Node::or(vec![]);
        assert!(!empty_or.is_valid());
        assert!(empty_or.validate(true).is_ok());
    }

    #[test]
    fn test_nested_invalid_node_detected() {
        let tree = Node::and(vec![cond("a", "1"), Node::or(vec![Node::Logical(LogicalNode::new(LogicalKind::Not))])]);
        assert!(!tree.is_valid());
    }

    #[test]
    fn test_apply_logical() {
        let row = json!({"a": "1", "b": "2"});
        assert!(Node::and(vec![cond("a", "1"), cond("b", "2")]).apply(&row));
        assert!(!Node::and(vec![cond("a", "1"), cond("b", "3")]).apply(&row));
        assert!(Node::or(vec![cond("a", "0"), cond("b", "2")]).apply(&row));
        assert!(Node::not(cond("a", "0")).apply(&row));
        assert!(!Node::Constant(false).apply(&row));
    }

    #[test]
    fn test_apply_dotted_path() {
        let row = json!({"author": {"name": "Ada"}, "x.y": 1});
        assert!(cond("author.name", "Ada").apply(&row));
        assert!(Node::condition("x.y", Operator::Equals, json!(1)).unwrap().apply(&row));
    }

    #[test]
    fn test_flatten_and_cancel() {
        let mut tree = LogicalNode::with_children(
            LogicalKind::And,
            vec![Node::and(vec![cond("a", "1"), cond("b", "2")]), cond("c", "3")],
        );
        tree.simplify_recursively();
        assert_eq!(
            tree,
            LogicalNode::with_children(
                LogicalKind::And,
                vec![cond("a", "1"), cond("b", "2"), cond("c", "3")]
            )
        );

        let mut negated = LogicalNode::with_children(
            LogicalKind::Or,
            vec![Node::not(Node::not(cond("a", "1")))],
        );
        negated.simplify_recursively();
        assert_eq!(negated.children(), &[cond("a", "1")]);
    }

    #[test]
    fn test_or_under_and_is_kept() {
        let mut tree = LogicalNode::with_children(
            LogicalKind::And,
            vec![Node::or(vec![cond("a", "1"), cond("b", "2")])],
        );
        let before = tree.clone();
        tree.simplify_recursively();
        assert_eq!(tree, before);
    }

    #[test]
    fn test_double_negation_hoists_into_flattening() {
        // and(not(not(and(a, b))), c) -> and(a, b, c)
        let mut tree = LogicalNode::with_children(
            LogicalKind::And,
            vec![
                Node::not(Node::not(Node::and(vec![cond("a", "1"), cond("b", "2")]))),
                cond("c", "3"),
            ],
        );
        tree.simplify_recursively();
        assert_eq!(tree.children(), &[cond("a", "1"), cond("b", "2"), cond("c", "3")]);
    }

    #[test]
    fn test_triple_negation() {
        let mut tree = LogicalNode::with_children(
            LogicalKind::And,
            vec![Node::not(Node::not(Node::not(cond("a", "1"))))],
        );
        tree.simplify_recursively();
        assert_eq!(tree.children(), &[Node::not(cond("a", "1"))]);
    }

    #[test]
    fn test_simplify_deep_tree_is_idempotent() {
        let mut node = cond("leaf", "x");
        for depth in 0..200 {
            node = match depth % 3 {
                0 => Node::and(vec![node, cond("a", "1")]),
                1 => Node::not(node),
                _ => Node::or(vec![node]),
            };
        }
        let mut once = LogicalNode::with_children(LogicalKind::And, vec![node]);
        once.simplify_recursively();
        let mut twice = once.clone();
        twice.simplify_recursively();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_to_array_keys() {
        let tree = LogicalNode::with_children(
            LogicalKind::And,
            vec![cond("a", "1"), Node::or(vec![cond("b", "2")]), Node::Constant(false)],
        );
        let array = tree.to_array();
        assert_eq!(
            array,
            json!({
                "_0": {"path": "a", "operator": "EQUALS", "value": "1"},
                "or_1": {"_0": {"path": "b", "operator": "EQUALS", "value": "2"}},
                "_2": false
            })
        );
        assert_eq!(LogicalNode::from_array(LogicalKind::And, &array).unwrap(), tree);
    }

    #[test]
    fn test_from_array_orders_by_index() {
        let mut children = Vec::new();
        for i in 0..12 {
            children.push(cond("f", &i.to_string()));
        }
        let tree = LogicalNode::with_children(LogicalKind::Or, children);
        let rebuilt = LogicalNode::from_array(LogicalKind::Or, &tree.to_array()).unwrap();
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn test_from_array_rejects_garbage() {
        assert!(LogicalNode::from_array(LogicalKind::And, &json!({"xor_0": {}})).is_err());
        assert!(LogicalNode::from_array(LogicalKind::And, &json!({"_x": true})).is_err());
        assert!(LogicalNode::from_array(LogicalKind::And, &json!([1])).is_err());
    }
}

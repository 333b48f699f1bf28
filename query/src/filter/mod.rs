//! Boolean filter trees over named fields.
//!
//! A [`Filter`] wraps an implicit root And node. Filters are built with
//! [`FilterTreeBuilder`] or parsed from query parameters with
//! [`FromQueryFilterCreator`], evaluated in memory with [`Filter::apply`]
//! and translated to SQL by the `database` crate.

pub mod builder;
pub mod from_query;
pub mod node;
pub mod operator;

pub use builder::FilterTreeBuilder;
pub use from_query::{FromQueryFilterCreator, ParsedFilter};
pub use node::{ConditionNode, LogicalKind, LogicalNode, Node};
pub use operator::Operator;

use crate::Result;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use tracing::debug;

/// A filter: an And-rooted tree of conditions
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    root: LogicalNode,
}

impl Default for Filter {
    fn default() -> Self {
        Self::create()
    }
}

impl Filter {
    /// Create an empty filter (matches everything)
    pub fn create() -> Self {
        Self {
            root: LogicalNode::new(LogicalKind::And),
        }
    }

    pub(crate) fn from_root(root: LogicalNode) -> Self {
        if root.kind() == LogicalKind::And {
            Self { root }
        } else {
            Self {
                root: LogicalNode::with_children(LogicalKind::And, vec![Node::Logical(root)]),
            }
        }
    }

    pub fn root(&self) -> &LogicalNode {
        &self.root
    }

    pub fn into_root(self) -> LogicalNode {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Validate the tree; nested And/Or groups must not be empty
    pub fn validate(&self) -> Result<()> {
        self.validate_with(false)
    }

    /// Validate the tree; the root itself may always be empty
    pub fn validate_with(&self, allow_empty_groups: bool) -> Result<()> {
        self.root.validate_children(allow_empty_groups)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Evaluate the filter against a single JSON row
    pub fn apply(&self, row: &JsonValue) -> bool {
        self.root.apply(row)
    }

    pub fn simplify(&mut self) {
        self.root.simplify_recursively();
    }

    /// AND-combine `other` into this filter.
    ///
    /// Combining with an empty filter leaves the non-empty operand unchanged.
    pub fn combine_with(&mut self, other: Filter) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }
        for child in other.root.into_children() {
            self.root.append_child(child);
        }
    }

    pub fn to_array(&self) -> JsonValue {
        self.root.to_array()
    }

    pub fn from_array(value: &JsonValue) -> Result<Self> {
        let root = LogicalNode::from_array(LogicalKind::And, value)?;
        Ok(Self { root })
    }

    /// All attribute paths referenced by conditions
    pub fn get_attribute_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        self.root
            .visit_conditions(&mut |condition| {
                paths.insert(condition.path().to_string());
            });
        paths
    }

    /// Replace every condition node by the node returned from `replace`
    pub fn replace_conditions(self, mut replace: impl FnMut(ConditionNode) -> Node) -> Self {
        Self {
            root: self.root.replace_conditions(&mut replace),
        }
    }

    /// Replace conditions over paths outside `allowed` with a constant false
    pub fn restrict_to_attribute_paths<S: AsRef<str>>(self, allowed: &[S]) -> Self {
        self.replace_conditions(|condition| {
            if allowed.iter().any(|path| path.as_ref() == condition.path()) {
                Node::Condition(condition)
            } else {
                debug!(
                    "Replacing condition on restricted path '{}' with constant false",
                    condition.path()
                );
                Node::Constant(false)
            }
        })
    }
}

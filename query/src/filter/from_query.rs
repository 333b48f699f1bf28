//! Creation of filters from decoded `filter[...]` query parameters.
//!
//! Supported item forms:
//!
//! - `filter[<id>][condition][path|operator|value|memberOf]=...`
//! - `filter[<id>][group][conjunction|memberOf]=...`
//! - `filter[<field>]=<value>` (equals shortcut)
//! - `filter[<field>][value]=<value>` (optionally with `[operator]`)
//!
//! All top-level items are combined by an implicit And at the root. Items
//! join a group with `memberOf`; `@root` is reserved for the root group.

use super::node::{ConditionNode, LogicalKind, LogicalNode, Node};
use super::operator::Operator;
use super::Filter;
use crate::{FilterError, Result};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

/// Id of the implicit root group
pub const ROOT_GROUP_ID: &str = "@root";

/// Group conjunctions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
    NotAnd,
    NotOr,
}

impl FromStr for Conjunction {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AND" => Ok(Conjunction::And),
            "OR" => Ok(Conjunction::Or),
            "NOT_AND" => Ok(Conjunction::NotAnd),
            "NOT_OR" => Ok(Conjunction::NotOr),
            other => Err(FilterError::ConjunctionUndefined(other.to_string())),
        }
    }
}

impl Conjunction {
    fn into_node(self, children: Vec<Node>) -> Node {
        match self {
            Conjunction::And => Node::and(children),
            Conjunction::Or => Node::or(children),
            Conjunction::NotAnd => Node::not(Node::and(children)),
            Conjunction::NotOr => Node::not(Node::or(children)),
        }
    }
}

/// A parsed filter together with the attribute paths it references
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilter {
    pub filter: Filter,
    pub used_attribute_paths: BTreeSet<String>,
}

enum ItemKind {
    Condition(ConditionNode),
    Group(Conjunction),
}

struct FilterItem {
    id: String,
    member_of: String,
    kind: ItemKind,
}

/// Builds [`Filter`]s from the decoded `filter` query parameter
pub struct FromQueryFilterCreator;

impl FromQueryFilterCreator {
    /// Create a filter, allowing only the given attribute paths
    pub fn create_filter<S: AsRef<str>>(
        filter_parameter: &JsonValue,
        available_attribute_paths: &[S],
    ) -> Result<Filter> {
        Self::create_filter_with_used_paths(filter_parameter, available_attribute_paths)
            .map(|parsed| parsed.filter)
    }

    /// Create a filter and report the attribute paths it uses
    pub fn create_filter_with_used_paths<S: AsRef<str>>(
        filter_parameter: &JsonValue,
        available_attribute_paths: &[S],
    ) -> Result<ParsedFilter> {
        let items = filter_parameter
            .as_object()
            .ok_or(FilterError::FilterParameterMustBeArray)?;

        let mut parsed_items = Vec::with_capacity(items.len());
        for (id, item) in items {
            parsed_items.push(Self::parse_item(id, item, available_attribute_paths)?);
        }

        let filter = Self::build_tree(parsed_items)?;
        filter.validate()?;
        let used_attribute_paths = filter.get_attribute_paths();

        debug!(
            "Created filter from query parameters using paths {:?}",
            used_attribute_paths
        );

        Ok(ParsedFilter {
            filter,
            used_attribute_paths,
        })
    }

    fn parse_item<S: AsRef<str>>(id: &str, item: &JsonValue, available: &[S]) -> Result<FilterItem> {
        if id == ROOT_GROUP_ID {
            return Err(FilterError::ReservedFilterItemId(id.to_string()));
        }

        match item {
            JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
                Self::check_path(id, available)?;
                let condition = ConditionNode::new(id, Operator::Equals, item.clone())?;
                Ok(FilterItem {
                    id: id.to_string(),
                    member_of: ROOT_GROUP_ID.to_string(),
                    kind: ItemKind::Condition(condition),
                })
            }
            JsonValue::Object(map) => {
                match (map.get("condition"), map.get("group")) {
                    (Some(_), Some(_)) => Err(FilterError::FilterItemInvalid(format!(
                        "item '{}' cannot be both a condition and a group",
                        id
                    ))),
                    (Some(condition), None) => Self::parse_condition(id, condition, available),
                    (None, Some(group)) => Self::parse_group(id, group),
                    (None, None) if map.contains_key("value") => {
                        Self::check_path(id, available)?;
                        let operator = Self::parse_operator(map)?;
                        let value = Self::parse_value(operator, map.get("value"))?;
                        Ok(FilterItem {
                            id: id.to_string(),
                            member_of: ROOT_GROUP_ID.to_string(),
                            kind: ItemKind::Condition(ConditionNode::new(id, operator, value)?),
                        })
                    }
                    (None, None) => Err(FilterError::FilterItemInvalid(format!(
                        "item '{}' must contain a condition, a group or a value",
                        id
                    ))),
                }
            }
            _ => Err(FilterError::FilterItemInvalid(format!(
                "item '{}' has an invalid shape",
                id
            ))),
        }
    }

    fn parse_condition<S: AsRef<str>>(
        id: &str,
        condition: &JsonValue,
        available: &[S],
    ) -> Result<FilterItem> {
        let map = condition.as_object().ok_or_else(|| {
            FilterError::FilterItemInvalid(format!("condition of item '{}' must be a group", id))
        })?;

        let path = match map.get("path") {
            Some(JsonValue::String(path)) if !path.is_empty() => path.as_str(),
            _ => return Err(FilterError::ConditionPathMissing(id.to_string())),
        };
        Self::check_path(path, available)?;

        let operator = Self::parse_operator(map)?;
        let value = Self::parse_value(operator, map.get("value"))?;

        Ok(FilterItem {
            id: id.to_string(),
            member_of: Self::parse_member_of(id, map)?,
            kind: ItemKind::Condition(ConditionNode::new(path, operator, value)?),
        })
    }

    fn parse_group(id: &str, group: &JsonValue) -> Result<FilterItem> {
        let map = group.as_object().ok_or_else(|| {
            FilterError::FilterItemInvalid(format!("group of item '{}' must be a group", id))
        })?;

        let conjunction = match map.get("conjunction") {
            Some(JsonValue::String(name)) => name.parse()?,
            Some(other) => return Err(FilterError::ConjunctionUndefined(other.to_string())),
            None => Conjunction::And,
        };

        Ok(FilterItem {
            id: id.to_string(),
            member_of: Self::parse_member_of(id, map)?,
            kind: ItemKind::Group(conjunction),
        })
    }

    fn parse_operator(map: &Map<String, JsonValue>) -> Result<Operator> {
        match map.get("operator") {
            Some(JsonValue::String(name)) => name.parse(),
            Some(other) => Err(FilterError::ConditionOperatorUndefined(other.to_string())),
            None => Ok(Operator::Equals),
        }
    }

    fn parse_value(operator: Operator, value: Option<&JsonValue>) -> Result<JsonValue> {
        match (operator, value) {
            (Operator::IsNull, None) => Ok(JsonValue::Null),
            (Operator::IsNull, Some(_)) => Err(FilterError::ConditionValueError(
                "operator IS_NULL does not take a value".to_string(),
            )),
            (Operator::InArray, Some(JsonValue::Array(items))) => Ok(JsonValue::Array(items.clone())),
            // `value[0]=a&value[1]=b`
            (Operator::InArray, Some(JsonValue::Object(map))) => {
                Ok(JsonValue::Array(map.values().cloned().collect()))
            }
            (Operator::InArray, _) => Err(FilterError::ConditionValueError(
                "operator IN_ARRAY requires an array value".to_string(),
            )),
            (_, Some(scalar @ (JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_)))) => {
                Ok(scalar.clone())
            }
            (_, Some(_)) => Err(FilterError::ConditionValueError(format!(
                "operator {} requires a scalar value",
                operator
            ))),
            (_, None) => Err(FilterError::ConditionValueError(format!(
                "operator {} requires a value",
                operator
            ))),
        }
    }

    fn parse_member_of(id: &str, map: &Map<String, JsonValue>) -> Result<String> {
        match map.get("memberOf") {
            None => Ok(ROOT_GROUP_ID.to_string()),
            Some(JsonValue::String(group)) if !group.is_empty() => Ok(group.clone()),
            Some(_) => Err(FilterError::FilterItemInvalid(format!(
                "memberOf of item '{}' must be a group id",
                id
            ))),
        }
    }

    fn check_path<S: AsRef<str>>(path: &str, available: &[S]) -> Result<()> {
        if available.iter().any(|candidate| candidate.as_ref() == path) {
            Ok(())
        } else {
            Err(FilterError::AttributePathUndefined(path.to_string()))
        }
    }

    fn build_tree(items: Vec<FilterItem>) -> Result<Filter> {
        let groups: HashMap<&str, &str> = items
            .iter()
            .filter(|item| matches!(item.kind, ItemKind::Group(_)))
            .map(|item| (item.id.as_str(), item.member_of.as_str()))
            .collect();

        for item in &items {
            if item.member_of != ROOT_GROUP_ID && !groups.contains_key(item.member_of.as_str()) {
                return Err(FilterError::FilterItemInvalid(format!(
                    "item '{}' is member of undefined group '{}'",
                    item.id, item.member_of
                )));
            }
        }

        for group_id in groups.keys() {
            let mut seen = HashSet::new();
            let mut current = *group_id;
            while current != ROOT_GROUP_ID {
                if !seen.insert(current) {
                    return Err(FilterError::FilterItemInvalid(format!(
                        "group '{}' is part of a membership cycle",
                        group_id
                    )));
                }
                current = groups.get(current).copied().unwrap_or(ROOT_GROUP_ID);
            }
        }

        let children = Self::build_children(&items, ROOT_GROUP_ID);
        Ok(Filter::from_root(LogicalNode::with_children(
            LogicalKind::And,
            children,
        )))
    }

    fn build_children(items: &[FilterItem], parent_id: &str) -> Vec<Node> {
        items
            .iter()
            .filter(|item| item.member_of == parent_id)
            .map(|item| match &item.kind {
                ItemKind::Condition(condition) => Node::Condition(condition.clone()),
                ItemKind::Group(conjunction) => {
                    conjunction.into_node(Self::build_children(items, &item.id))
                }
            })
            .collect()
    }
}

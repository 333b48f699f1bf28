//! Sorting of collections by one or more attribute paths.
//!
//! The `sort` query parameter is a comma separated list of paths; a leading
//! `-` sorts descending: `sort=name,-createdAt`.

use crate::filter::node::lookup_path;
use crate::{FilterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub path: String,
    pub direction: SortDirection,
}

/// Ordered list of sort fields; the first field has the highest priority
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    fields: Vec<SortField>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, path: impl Into<String>, direction: SortDirection) -> Self {
        self.fields.push(SortField {
            path: path.into(),
            direction,
        });
        self
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a `sort` parameter, allowing only the given attribute paths
    pub fn from_query<S: AsRef<str>>(sort_parameter: &str, available_attribute_paths: &[S]) -> Result<Self> {
        let mut sort = Sort::new();

        for raw in sort_parameter.split(',') {
            let raw = raw.trim();
            let (path, direction) = match raw.strip_prefix('-') {
                Some(path) => (path, SortDirection::Desc),
                None => (raw.strip_prefix('+').unwrap_or(raw), SortDirection::Asc),
            };

            if path.is_empty() {
                return Err(FilterError::SortInvalid(format!(
                    "empty sort field in '{}'",
                    sort_parameter
                )));
            }
            if !available_attribute_paths.iter().any(|p| p.as_ref() == path) {
                return Err(FilterError::SortInvalid(format!(
                    "undefined sort path '{}'",
                    path
                )));
            }
            if sort.fields.iter().any(|field| field.path == path) {
                return Err(FilterError::SortInvalid(format!(
                    "duplicate sort path '{}'",
                    path
                )));
            }

            sort = sort.add(path, direction);
        }

        Ok(sort)
    }

    /// Stable in-memory sort of JSON rows
    pub fn apply(&self, rows: &mut [JsonValue]) {
        if self.fields.is_empty() {
            return;
        }
        rows.sort_by(|a, b| self.compare(a, b));
    }

    fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        for field in &self.fields {
            let ordering = compare_json(lookup_path(a, &field.path), lookup_path(b, &field.path));
            let ordering = match field.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

// Nulls first, then booleans, numbers, strings; same as SQLite's ordering
fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(value: Option<&JsonValue>) -> u8 {
        match value {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Bool(_)) => 1,
            Some(JsonValue::Number(_)) => 2,
            Some(JsonValue::String(_)) => 3,
            Some(JsonValue::Array(_)) => 4,
            Some(JsonValue::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

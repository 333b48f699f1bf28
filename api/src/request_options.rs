//! Collection request options: filter, sort and pagination.
//!
//! Query filters (`filter[...]`) are restricted to the public scalar paths
//! of the entity. Prepared filters (`preparedFilter=<id>`) are configured
//! server-side, may use any scalar field, and are combined with the query
//! filter by conjunction.

use crate::error::{ApiError, ApiResult};
use authz::{Expression, RequestAuthorizer};
use entities::EntityDefinition;
use query::pagination::{DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE};
use query::parameters::{get_string, parse_query_string};
use query::{Filter, FromQueryFilterCreator, Pagination, Sort};
use serde::Deserialize;
use tracing::{debug, error};

pub const FILTER_PARAMETER: &str = "filter";
pub const PREPARED_FILTER_PARAMETER: &str = "preparedFilter";
pub const SORT_PARAMETER: &str = "sort";
pub const PAGE_PARAMETER: &str = "page";
pub const PER_PAGE_PARAMETER: &str = "perPage";

/// Query options of the REST collection endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub query_filters_enabled: bool,
    pub prepared_filters_enabled: bool,
    pub sort_enabled: bool,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub prepared_filters: Vec<PreparedFilter>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            query_filters_enabled: true,
            prepared_filters_enabled: true,
            sort_enabled: true,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            prepared_filters: Vec::new(),
        }
    }
}

impl RestConfig {
    pub fn prepared_filter(&self, id: &str) -> Option<&PreparedFilter> {
        self.prepared_filters.iter().find(|prepared| prepared.id == id)
    }
}

/// A named filter usable through `preparedFilter=<id>`
///
/// ```yaml
/// id: published
/// filter: 'filter[status]=published'
/// policy: 'user.isAuthenticated()'
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PreparedFilter {
    pub id: String,
    /// Query string in the `filter[...]` format
    pub filter: String,
    /// Who may use the filter; anyone if absent
    #[serde(default)]
    pub policy: Option<Expression>,
}

impl PreparedFilter {
    fn is_granted(&self, authorizer: &RequestAuthorizer) -> ApiResult<bool> {
        match &self.policy {
            Some(policy) => Ok(authorizer.is_granted_expression(policy, None)?),
            None => Ok(true),
        }
    }

    fn create_filter(&self, entity: &EntityDefinition) -> ApiResult<Filter> {
        let parameters = parse_query_string(&self.filter);
        let Some(filter_parameter) = parameters.get(FILTER_PARAMETER) else {
            return Ok(Filter::create());
        };

        let paths: Vec<&str> = entity
            .fields
            .iter()
            .filter(|field| field.field_type.is_queryable())
            .map(|field| field.name.as_str())
            .collect();

        FromQueryFilterCreator::create_filter(filter_parameter, paths.as_slice()).map_err(|e| {
            error!(
                "Prepared filter '{}' is invalid for entity '{}': {}",
                self.id, entity.short_name, e
            );
            ApiError::InternalError(format!("Prepared filter '{}' is invalid", self.id))
        })
    }
}

/// Parsed options of a collection request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub filter: Filter,
    pub sort: Sort,
    pub pagination: Pagination,
}

impl RequestOptions {
    /// Parse the raw query string of a collection request for `entity`
    pub fn from_query_string(
        query: &str,
        entity: &EntityDefinition,
        config: &RestConfig,
        authorizer: &RequestAuthorizer,
    ) -> ApiResult<Self> {
        let parameters = parse_query_string(query);
        let query_paths = entity.query_paths();

        let mut filter = match parameters.get(FILTER_PARAMETER) {
            Some(_) if !config.query_filters_enabled => return Err(ApiError::QueryFiltersDisabled),
            Some(filter_parameter) => FromQueryFilterCreator::create_filter(filter_parameter, query_paths.as_slice())?,
            None => Filter::create(),
        };

        if let Some(id) = get_string(&parameters, PREPARED_FILTER_PARAMETER) {
            if !config.prepared_filters_enabled {
                return Err(ApiError::PreparedFiltersDisabled);
            }
            let prepared = config
                .prepared_filter(id)
                .ok_or_else(|| ApiError::PreparedFilterUndefined(id.to_string()))?;
            if !prepared.is_granted(authorizer)? {
                return Err(ApiError::PreparedFilterAccessDenied(id.to_string()));
            }
            filter.combine_with(prepared.create_filter(entity)?);
        }

        let sort = match get_string(&parameters, SORT_PARAMETER) {
            Some(_) if !config.sort_enabled => return Err(ApiError::SortDisabled),
            Some(sort_parameter) if !sort_parameter.trim().is_empty() => {
                Sort::from_query(sort_parameter, query_paths.as_slice())?
            }
            _ => Sort::new(),
        };

        let pagination = Pagination::from_query(
            get_string(&parameters, PAGE_PARAMETER),
            get_string(&parameters, PER_PAGE_PARAMETER),
            config.default_page_size,
            config.max_page_size,
        );

        debug!(
            "Request options for '{}': filter paths {:?}, {} sort fields, page {}",
            entity.short_name,
            filter.get_attribute_paths(),
            sort.fields().len(),
            pagination.current_page
        );

        Ok(Self {
            filter,
            sort,
            pagination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz::{AuthorizationConfig, AuthorizationService, StaticUserAttributeProvider, UserAttributeRegistry};
    use entities::{Field, FieldType};
    use query::SortDirection;
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> Arc<AuthorizationService> {
        let mut registry = UserAttributeRegistry::new();
        registry.add_provider(Arc::new(
            StaticUserAttributeProvider::new()
                .with_attribute("EDITOR", json!(false))
                .with_user_value("erin", "EDITOR", json!(true)),
        ));
        Arc::new(AuthorizationService::new(&AuthorizationConfig::default(), registry).unwrap())
    }

    fn article() -> EntityDefinition {
        EntityDefinition::new("Article")
            .with_field(Field::new("id", FieldType::Integer))
            .with_field(Field::new("title", FieldType::Text))
            .with_field(Field::new("status", FieldType::Text))
            .with_field(Field::new("notes", FieldType::Text))
            .with_output_attribute("notes")
    }

    fn config() -> RestConfig {
        let yaml = r#"
max_page_size: 50
prepared_filters:
  - id: published
    filter: 'filter[status]=published'
  - id: drafts
    filter: 'filter[status]=draft'
    policy: 'user.get("EDITOR")'
  - id: annotated
    filter: 'filter[n][condition][path]=notes&filter[n][condition][operator]=IS_NULL'
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    fn options(query: &str, user: Option<&str>) -> ApiResult<RequestOptions> {
        let authorizer = service().for_user(user.map(str::to_string));
        RequestOptions::from_query_string(query, &article(), &config(), &authorizer)
    }

    #[test]
    fn test_defaults() {
        let options = options("", None).unwrap();
        assert!(options.filter.is_empty());
        assert!(options.sort.is_empty());
        assert_eq!(options.pagination, Pagination::new(1, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn test_query_filter_sort_and_pagination() {
        let options = options("filter[title][operator]=I_CONTAINS&filter[title][value]=rust&sort=-title,id&page=3&perPage=500", None)
            .unwrap();

        assert!(options.filter.apply(&json!({"title": "Learning Rust"})));
        assert!(!options.filter.apply(&json!({"title": "Go"})));
        assert_eq!(options.sort.fields()[0].path, "title");
        assert_eq!(options.sort.fields()[0].direction, SortDirection::Desc);
        assert_eq!(options.pagination, Pagination::new(3, 50));
    }

    #[test]
    fn test_gated_field_is_not_filterable() {
        let err = options("filter[notes]=x", None).unwrap_err();
        assert_eq!(err.error_code(), "core:filter-invalid");

        let err = options("sort=notes", None).unwrap_err();
        assert_eq!(err.error_code(), "core:sort-invalid");
    }

    #[test]
    fn test_filter_parameter_must_be_a_group() {
        let err = options("filter=title", None).unwrap_err();
        assert_eq!(err.error_code(), "core:filter-parameter-must-be-an-array");
    }

    #[test]
    fn test_prepared_filter_is_combined() {
        let options = options("filter[title]=Hello&preparedFilter=published", None).unwrap();
        assert!(options.filter.apply(&json!({"title": "Hello", "status": "published"})));
        assert!(!options.filter.apply(&json!({"title": "Hello", "status": "draft"})));
        assert!(!options.filter.apply(&json!({"title": "Bye", "status": "published"})));
    }

    #[test]
    fn test_prepared_filter_may_use_gated_fields() {
        let options = options("preparedFilter=annotated", None).unwrap();
        assert!(options.filter.apply(&json!({"notes": null})));
        assert!(!options.filter.apply(&json!({"notes": "internal"})));
    }

    #[test]
    fn test_prepared_filter_policy() {
        let err = options("preparedFilter=drafts", Some("bob")).unwrap_err();
        assert_eq!(err.error_code(), "core:prepared-filter-access-denied");

        let options = options("preparedFilter=drafts", Some("erin")).unwrap();
        assert!(options.filter.apply(&json!({"status": "draft"})));
    }

    #[test]
    fn test_prepared_filter_undefined() {
        let err = options("preparedFilter=unknown", None).unwrap_err();
        assert_eq!(err.error_code(), "core:prepared-filter-undefined");
    }

    #[test]
    fn test_disabled_features() {
        let authorizer = service().for_user(None);
        let config = RestConfig {
            query_filters_enabled: false,
            prepared_filters_enabled: false,
            sort_enabled: false,
            ..config()
        };

        let err = RequestOptions::from_query_string("filter[title]=a", &article(), &config, &authorizer).unwrap_err();
        assert_eq!(err.error_code(), "core:query-filters-disabled");

        let err = RequestOptions::from_query_string("preparedFilter=published", &article(), &config, &authorizer)
            .unwrap_err();
        assert_eq!(err.error_code(), "core:prepared-filters-disabled");

        let err = RequestOptions::from_query_string("sort=title", &article(), &config, &authorizer).unwrap_err();
        assert_eq!(err.error_code(), "core:sort-disabled");

        // Paging stays available
        let options = RequestOptions::from_query_string("page=2", &article(), &config, &authorizer).unwrap();
        assert_eq!(options.pagination.current_page, 2);
    }
}

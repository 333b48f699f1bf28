use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use database::EntityStorage;
use entities::NormalizationContext;
use query::FullPaginator;
use tracing::{debug, info};

use crate::{
    error::{ApiError, ApiErrorResponse, ApiResult},
    middleware_hooks::CurrentUser,
    models::{CreateEntityRequest, EntityListResponse, EntityResponse},
    request_options::RequestOptions,
    AppState,
};

pub const GET_COLLECTION_OPERATION: &str = "get_collection";
pub const GET_ITEM_OPERATION: &str = "get_item";
pub const CREATE_OPERATION: &str = "create";

/// Read a single entity by ID
///
/// GET /api/v1/entity/read/{entity_type}/{id}
#[utoipa::path(
    get,
    path = "/api/v1/entity/read/{entity_type}/{id}",
    params(
        ("entity_type" = String, Path, description = "Short name of the entity"),
        ("id" = String, Path, description = "Identifier of the instance"),
        ("X-Relay-User" = Option<String>, Header, description = "Authenticated user")
    ),
    responses(
        (status = 200, description = "Entity retrieved successfully", body = EntityResponse),
        (status = 401, description = "Authentication required", body = ApiErrorResponse),
        (status = 403, description = "Access denied", body = ApiErrorResponse),
        (status = 404, description = "Entity not found", body = ApiErrorResponse),
        (status = 500, description = "Internal server error", body = ApiErrorResponse)
    ),
    tag = "entities"
)]
pub async fn read_entity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((entity_type, id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    info!("Reading entity: type={}, id={}", entity_type, id);

    let entity = state.entity(&entity_type)?;
    let authorizer = state.authorization.for_user(user.0);
    authorizer.deny_operation_access_unless_granted(&entity.operation_id(GET_ITEM_OPERATION))?;

    let item = EntityStorage::new(&state.db, entity)
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound(format!("Entity {} with id {} not found", entity_type, id)))?;

    let mut ctx = NormalizationContext::new(&authorizer);
    let data = state.normalizer.normalize(&item, &entity.short_name, &mut ctx)?;

    Ok(Json(EntityResponse {
        id: Some(id),
        entity_type,
        data,
    }))
}

/// List entities of a specific type
///
/// GET /api/v1/entity/list/{entity_type}
#[utoipa::path(
    get,
    path = "/api/v1/entity/list/{entity_type}",
    params(
        ("entity_type" = String, Path, description = "Short name of the entity"),
        ("filter" = Option<String>, Query, description = "Filter groups, e.g. filter[title][operator]=I_CONTAINS&filter[title][value]=rust"),
        ("preparedFilter" = Option<String>, Query, description = "Id of a configured filter"),
        ("sort" = Option<String>, Query, description = "Comma separated paths, '-' prefix for descending"),
        ("page" = Option<usize>, Query, description = "Page number (default: 1)"),
        ("perPage" = Option<usize>, Query, description = "Items per page (default: 30)"),
        ("X-Relay-User" = Option<String>, Header, description = "Authenticated user")
    ),
    responses(
        (status = 200, description = "Entities listed successfully", body = EntityListResponse),
        (status = 400, description = "Invalid entity type, filter or sort", body = ApiErrorResponse),
        (status = 401, description = "Authentication required", body = ApiErrorResponse),
        (status = 403, description = "Access denied", body = ApiErrorResponse),
        (status = 500, description = "Internal server error", body = ApiErrorResponse)
    ),
    tag = "entities"
)]
pub async fn list_entities(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(entity_type): Path<String>,
    RawQuery(query): RawQuery,
) -> ApiResult<impl IntoResponse> {
    info!("Listing entities: type={}", entity_type);

    let entity = state.entity(&entity_type)?;
    let authorizer = state.authorization.for_user(user.0);
    authorizer.deny_operation_access_unless_granted(&entity.operation_id(GET_COLLECTION_OPERATION))?;

    let options = RequestOptions::from_query_string(query.as_deref().unwrap_or_default(), entity, &state.rest, &authorizer)?;

    let storage = EntityStorage::new(&state.db, entity);
    let items = storage
        .list(&options.filter, &options.sort, Some(&options.pagination))
        .await?;
    let total = storage.count(&options.filter).await?;
    debug!("Found {} of {} matching {} instances", items.len(), total, entity_type);

    let mut ctx = NormalizationContext::new(&authorizer);
    let items = items
        .iter()
        .map(|item| state.normalizer.normalize(item, &entity.short_name, &mut ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let total = usize::try_from(total).unwrap_or(usize::MAX);
    let page = FullPaginator::new(items, options.pagination, total);
    Ok(Json(EntityListResponse::from(page)))
}

/// Create a new entity
///
/// POST /api/v1/entity/create/{entity_type}
///
/// Input fields the user may not write are dropped before storing.
#[utoipa::path(
    post,
    path = "/api/v1/entity/create/{entity_type}",
    params(
        ("entity_type" = String, Path, description = "Short name of the entity"),
        ("X-Relay-User" = Option<String>, Header, description = "Authenticated user")
    ),
    request_body = CreateEntityRequest,
    responses(
        (status = 201, description = "Entity created successfully", body = EntityResponse),
        (status = 400, description = "Invalid request", body = ApiErrorResponse),
        (status = 401, description = "Authentication required", body = ApiErrorResponse),
        (status = 403, description = "Access denied", body = ApiErrorResponse),
        (status = 500, description = "Internal server error", body = ApiErrorResponse)
    ),
    tag = "entities"
)]
pub async fn create_entity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(entity_type): Path<String>,
    Json(request): Json<CreateEntityRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Creating entity: type={}", entity_type);

    let entity = state.entity(&entity_type)?;
    let authorizer = state.authorization.for_user(user.0);
    authorizer.deny_operation_access_unless_granted(&entity.operation_id(CREATE_OPERATION))?;

    let accepted = state
        .normalizer
        .denormalize_value(&request.data, &entity.short_name, &authorizer, None)?;
    let Some(values) = accepted.as_object() else {
        return Err(ApiError::BadRequest("Entity data must be an object".to_string()));
    };

    let stored = EntityStorage::new(&state.db, entity).create(values).await?;
    let id = entity.identifier_of(&stored);
    info!("Created {} with id {:?}", entity_type, id);

    let mut ctx = NormalizationContext::new(&authorizer);
    let data = state.normalizer.normalize(&stored, &entity.short_name, &mut ctx)?;

    Ok((
        StatusCode::CREATED,
        Json(EntityResponse {
            id,
            entity_type,
            data,
        }),
    ))
}

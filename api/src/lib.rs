use authz::{AuthorizationService, UserAttributeRegistry};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use database::Database;
use entities::{EntityDefinition, EntityNormalizer, EntityRegistry};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware_hooks;
pub mod models;
pub mod request_options;
pub mod server;

use config::{ConfigError, CoreConfig};
use error::{ApiError, ApiResult};
use request_options::RestConfig;

pub use server::{start_server_with_config, ApiConfig};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub registry: Arc<EntityRegistry>,
    pub authorization: Arc<AuthorizationService>,
    pub normalizer: Arc<EntityNormalizer>,
    pub rest: Arc<RestConfig>,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<EntityRegistry>,
        authorization: Arc<AuthorizationService>,
        rest: RestConfig,
    ) -> Self {
        Self {
            normalizer: Arc::new(EntityNormalizer::new(Arc::clone(&registry))),
            db,
            registry,
            authorization,
            rest: Arc::new(rest),
        }
    }

    /// Build the entity registry, the authorization service and the database
    pub async fn from_config(config: &CoreConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Arc::new(config.build_registry()?);

        let mut attributes = UserAttributeRegistry::new();
        attributes.add_provider(Arc::new(config.user_attributes.clone()));
        let authorization =
            Arc::new(AuthorizationService::new(&config.authorization, attributes).map_err(ConfigError::from)?);

        let db = database::initialize_database(&config.database, &registry).await?;

        Ok(Self::new(db, registry, authorization, config.rest.clone()))
    }

    /// The registered entity `short_name`
    pub fn entity(&self, short_name: &str) -> ApiResult<&EntityDefinition> {
        self.registry
            .get(short_name)
            .ok_or_else(|| ApiError::InvalidEntityType(short_name.to_string()))
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::entity::read_entity,
        handlers::entity::list_entities,
        handlers::entity::create_entity,
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::EntityResponse,
            models::EntityListResponse,
            models::CreateEntityRequest,
            models::HealthResponse,
            models::DatabaseHealth,
            models::EntityHealth,
            error::ApiErrorResponse,
            error::ErrorDetail,
        )
    ),
    tags(
        (name = "entities", description = "Filtered, access controlled entity operations"),
        (name = "health", description = "Health check endpoints"),
    ),
    info(
        title = "Relay Core API",
        version = "1.0.0",
        description = "Entity access with attribute based authorization",
    ),
)]
pub struct ApiDoc;

/// Create the main API router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/entity/list/:entity_type", get(handlers::entity::list_entities))
        .route("/entity/read/:entity_type/:id", get(handlers::entity::read_entity))
        .route("/entity/create/:entity_type", post(handlers::entity::create_entity))
        .route("/health", get(handlers::health::health_check))
        .layer(middleware::from_fn(middleware_hooks::user_middleware))
        .layer(middleware::from_fn(middleware_hooks::request_middleware))
        .layer(middleware::from_fn(middleware_hooks::response_middleware));

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/api/v1/swagger").url("/api/v1/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use database::EntityStorage;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
database:
  url: "sqlite::memory:"
authorization:
  operations:
    "Article:get_collection": 'true'
    "Article:get_item": 'true'
    "Article:create": 'user.isAuthenticated()'
  resource_permissions:
    "Article:output:notes": 'user.get("ADMIN") or resource.author == user.getIdentifier()'
    "Article:input:notes": 'user.get("ADMIN")'
user_attributes:
  attributes:
    ADMIN: false
  users:
    alice:
      ADMIN: true
entities:
  - short_name: Article
    fields:
      - { name: id, type: integer }
      - { name: title, type: text, required: true }
      - { name: author, type: text }
      - { name: rating, type: integer }
      - { name: notes, type: text }
    input_fields: [title, author, rating]
    output_attributes: [notes]
    input_attributes: [notes]
  - short_name: Secret
    fields:
      - { name: id, type: integer }
rest:
  max_page_size: 2
  prepared_filters:
    - id: rated
      filter: 'filter[rating][operator]=GREATER_THAN_OR_EQUAL&filter[rating][value]=4'
"#;

    async fn state() -> AppState {
        let config = CoreConfig::from_yaml_str(CONFIG).unwrap();
        let state = AppState::from_config(&config).await.unwrap();

        let entity = state.entity("Article").unwrap();
        let storage = EntityStorage::new(&state.db, entity);
        for article in [
            json!({"title": "Hello Rust", "author": "bob", "rating": 5, "notes": "bob's draft"}),
            json!({"title": "Ownership", "author": "carol", "rating": 3, "notes": "needs review"}),
            json!({"title": "Async in practice", "author": "bob", "rating": 4}),
        ] {
            storage.create(article.as_object().unwrap()).await.unwrap();
        }
        state
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if body.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, body)
    }

    async fn get(state: &AppState, uri: &str, user: Option<&str>) -> (StatusCode, JsonValue) {
        let mut request = Request::builder().uri(uri);
        if let Some(user) = user {
            request = request.header("X-Relay-User", user);
        }
        send(state, request.body(Body::empty()).unwrap()).await
    }

    async fn post(state: &AppState, uri: &str, user: Option<&str>, body: JsonValue) -> (StatusCode, JsonValue) {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            request = request.header("X-Relay-User", user);
        }
        send(state, request.body(Body::from(body.to_string())).unwrap()).await
    }

    fn titles(body: &JsonValue) -> Vec<&str> {
        body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["title"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = state().await;
        let (status, body) = get(&state, "/api/v1/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"]["connected"], true);
        let entities = body["entities"].as_array().unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0]["entity"], "Article");
        assert!(entities.iter().all(|entity| entity["ready"] == true));

        sqlx::query("DROP TABLE secret").execute(state.db.pool()).await.unwrap();
        let (status, body) = get(&state, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["entities"][1]["ready"], false);
    }

    #[tokio::test]
    async fn test_list_hides_gated_fields() {
        let state = state().await;

        let (status, body) = get(&state, "/api/v1/entity/list/Article?perPage=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalItems"], 3);
        assert_eq!(body["maxNumItemsPerPage"], 2);
        assert_eq!(body["lastPage"], 2);
        assert!(body["items"]
            .as_array()
            .unwrap()
            .iter()
            .all(|item| item.get("notes").is_none()));

        // Per instance: bob reads the notes of his own articles only
        let (_, body) = get(&state, "/api/v1/entity/list/Article?sort=title", Some("bob")).await;
        assert_eq!(titles(&body), vec!["Async in practice", "Hello Rust"]);
        assert_eq!(body["items"][1]["notes"], "bob's draft");

        let (_, body) = get(&state, "/api/v1/entity/list/Article?sort=title&page=2", Some("bob")).await;
        assert_eq!(titles(&body), vec!["Ownership"]);
        assert!(body["items"][0].get("notes").is_none());

        let (_, body) = get(&state, "/api/v1/entity/list/Article?sort=title&page=2", Some("alice")).await;
        assert_eq!(body["items"][0]["notes"], "needs review");
    }

    #[tokio::test]
    async fn test_list_with_filter_and_sort() {
        let state = state().await;

        let (status, body) = get(
            &state,
            "/api/v1/entity/list/Article?filter[author]=bob&sort=-rating",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalItems"], 2);
        assert_eq!(titles(&body), vec!["Hello Rust", "Async in practice"]);

        let (_, body) = get(
            &state,
            "/api/v1/entity/list/Article?filter[t][condition][path]=title&filter[t][condition][operator]=I_CONTAINS&filter[t][condition][value]=RUST",
            None,
        )
        .await;
        assert_eq!(titles(&body), vec!["Hello Rust"]);

        let (_, body) = get(&state, "/api/v1/entity/list/Article?preparedFilter=rated&sort=rating", None).await;
        assert_eq!(titles(&body), vec!["Async in practice", "Hello Rust"]);
    }

    #[tokio::test]
    async fn test_list_rejects_invalid_options() {
        let state = state().await;

        let (status, body) = get(&state, "/api/v1/entity/list/Article?filter[notes]=x", Some("alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "core:filter-invalid");
        assert_eq!(body["error"]["details"]["reason"], "ATTRIBUTE_PATH_UNDEFINED");

        let (status, body) = get(&state, "/api/v1/entity/list/Article?filter=title", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "core:filter-parameter-must-be-an-array");

        let (_, body) = get(&state, "/api/v1/entity/list/Article?sort=unknown", None).await;
        assert_eq!(body["error"]["code"], "core:sort-invalid");

        let (_, body) = get(&state, "/api/v1/entity/list/Article?preparedFilter=nope", None).await;
        assert_eq!(body["error"]["code"], "core:prepared-filter-undefined");

        let (status, body) = get(&state, "/api/v1/entity/list/Unknown", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "core:invalid-entity-type");
    }

    #[tokio::test]
    async fn test_undefined_operation_is_denied() {
        let state = state().await;

        let (status, body) = get(&state, "/api/v1/entity/list/Secret", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "core:unauthorized");

        let (status, body) = get(&state, "/api/v1/entity/list/Secret", Some("alice")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "core:forbidden");
    }

    #[tokio::test]
    async fn test_read_entity() {
        let state = state().await;

        let (status, body) = get(&state, "/api/v1/entity/read/Article/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entityType"], "Article");
        assert_eq!(body["data"]["title"], "Hello Rust");
        assert!(body["data"].get("notes").is_none());

        let (_, body) = get(&state, "/api/v1/entity/read/Article/1", Some("bob")).await;
        assert_eq!(body["data"]["notes"], "bob's draft");

        let (status, body) = get(&state, "/api/v1/entity/read/Article/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "core:entity-not-found");
    }

    #[tokio::test]
    async fn test_create_entity() {
        let state = state().await;
        let article = json!({"data": {"title": "New", "author": "bob", "notes": "private"}});

        let (status, _) = post(&state, "/api/v1/entity/create/Article", None, article.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Non-writable input is dropped
        let (status, body) = post(&state, "/api/v1/entity/create/Article", Some("bob"), article.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "4");
        assert_eq!(body["data"]["title"], "New");
        assert_eq!(body["data"]["notes"], JsonValue::Null);

        let (status, body) = post(&state, "/api/v1/entity/create/Article", Some("alice"), article).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["notes"], "private");

        let (status, body) = post(
            &state,
            "/api/v1/entity/create/Article",
            Some("alice"),
            json!({"data": {"author": "alice"}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "core:validation-error");
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let state = state().await;
        let (status, body) = get(&state, "/api/v1/openapi.json", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"].get("/api/v1/entity/list/{entity_type}").is_some());
    }
}

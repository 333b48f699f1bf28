use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    error::ApiResult,
    models::{DatabaseHealth, EntityHealth, HealthResponse},
    AppState,
};

/// Health check endpoint
///
/// GET /api/v1/health
///
/// Healthy once every registered entity has its table.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Readiness of the registered entities", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let mut definitions: Vec<_> = state.registry.definitions().collect();
    definitions.sort_by(|a, b| a.short_name.cmp(&b.short_name));

    let mut entities = Vec::with_capacity(definitions.len());
    let mut failure = None;
    for definition in definitions {
        let table = definition.table_name();
        let ready = match state.db.table_exists(&table).await {
            Ok(exists) => exists,
            Err(e) => {
                failure.get_or_insert_with(|| e.to_string());
                false
            }
        };
        if !ready {
            warn!("Entity {} is not ready: table {} unavailable", definition.short_name, table);
        }
        entities.push(EntityHealth {
            entity: definition.short_name.clone(),
            table,
            ready,
        });
    }

    let database = match failure {
        None => DatabaseHealth {
            connected: true,
            message: "Entity tables checked".to_string(),
        },
        Some(error) => DatabaseHealth {
            connected: false,
            message: format!("Entity table lookup failed: {}", error),
        },
    };
    let ready = entities.iter().all(|entity| entity.ready);
    debug!("Health check: {} entities, ready={}", entities.len(), ready);

    Ok(Json(HealthResponse {
        status: if ready { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        database,
        entities,
    }))
}

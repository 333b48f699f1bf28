use chrono::{DateTime, Utc};
use query::FullPaginator;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single normalized entity
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityResponse {
    pub id: Option<String>,
    pub entity_type: String,
    /// Fields the requesting user may read
    pub data: serde_json::Value,
}

/// A page of normalized entities
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityListResponse {
    pub items: Vec<serde_json::Value>,
    pub current_page: usize,
    pub max_num_items_per_page: usize,
    pub total_items: usize,
    pub last_page: usize,
}

impl From<FullPaginator<serde_json::Value>> for EntityListResponse {
    fn from(page: FullPaginator<serde_json::Value>) -> Self {
        Self {
            items: page.items,
            current_page: page.current_page,
            max_num_items_per_page: page.max_num_items_per_page,
            total_items: page.total_items,
            last_page: page.last_page,
        }
    }
}

/// Request to create a new entity
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEntityRequest {
    pub data: serde_json::Value,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: DatabaseHealth,
    pub entities: Vec<EntityHealth>,
}

/// Whether a registered entity can be served
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EntityHealth {
    pub entity: String,
    pub table: String,
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub message: String,
}

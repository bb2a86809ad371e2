//! Config API handlers
//!
//! POST /configs, GET /configs/:config_id, DELETE /configs/:config_id/data

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db::cleanup::{self, DeletionCounts};
use crate::db::configs;
use crate::error::{ApiError, ApiResult};
use crate::models::{InsightConfig, NewInsightConfig};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteDataResponse {
    pub config_id: Uuid,
    pub deleted: DeletionCounts,
    pub total_deleted: u64,
}

/// POST /configs
///
/// Validate and store a structured config payload.
pub async fn create_config(
    State(state): State<AppState>,
    Json(request): Json<NewInsightConfig>,
) -> ApiResult<(StatusCode, Json<InsightConfig>)> {
    let config = InsightConfig::create(request).map_err(ApiError::BadRequest)?;
    configs::save_config(&state.ctx.db, &config).await?;

    tracing::info!(
        config_id = %config.config_id,
        features = config.extraction_schema.feature_names.len(),
        attributes = config.extraction_schema.attributes.len(),
        "Config created"
    );

    Ok((StatusCode::CREATED, Json(config)))
}

/// GET /configs/:config_id
pub async fn get_config(
    State(state): State<AppState>,
    Path(config_id): Path<Uuid>,
) -> ApiResult<Json<InsightConfig>> {
    let config = configs::load_config(&state.ctx.db, config_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Config not found: {}", config_id)))?;
    Ok(Json(config))
}

/// DELETE /configs/:config_id/data
///
/// Removes every row derived from the config. The config itself stays.
pub async fn delete_config_data(
    State(state): State<AppState>,
    Path(config_id): Path<Uuid>,
) -> ApiResult<Json<DeleteDataResponse>> {
    if configs::load_config(&state.ctx.db, config_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Config not found: {}", config_id)));
    }
    if state.is_running(config_id).await {
        return Err(ApiError::Conflict(format!(
            "Pipeline is running for config {}",
            config_id
        )));
    }

    let deleted = cleanup::delete_config_data(&state.ctx.db, config_id).await?;
    Ok(Json(DeleteDataResponse {
        config_id,
        total_deleted: deleted.total(),
        deleted,
    }))
}

pub fn config_routes() -> Router<AppState> {
    Router::new()
        .route("/configs", post(create_config))
        .route("/configs/:config_id", get(get_config))
        .route("/configs/:config_id/data", delete(delete_config_data))
}

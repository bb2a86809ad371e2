//! Single-phase API handlers
//!
//! Each endpoint runs one phase to completion within the request and returns
//! its report: counts, `statistics`, `errors` and `warnings`. Body fields
//! other than `config_id` override the config's stored parameters for this
//! invocation only.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    CategoryAssignmentReport, CategoryDiscoveryReport, FeatureExtractionReport, InsightConfig,
    ParamOverrides, SampleReport, SubcategoryAssignmentReport, SubcategoryDiscoveryReport,
    TaxonomyParams,
};
use crate::services::feature_extractor::sampled_conversation_ids;
use crate::services::pipeline_orchestrator::load_config;
use crate::services::{
    assign_categories, assign_subcategories, discover_categories, discover_subcategories,
    extract_features, run_sampling, PhaseContext,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PhaseRequest {
    pub config_id: Uuid,
    #[serde(flatten)]
    pub overrides: ParamOverrides,
}

#[derive(Debug, Deserialize)]
pub struct FeaturesRequest {
    pub config_id: Uuid,
    /// Explicit work list; defaults to the persisted sample
    #[serde(default)]
    pub conversation_ids: Option<Vec<String>>,
    #[serde(flatten)]
    pub overrides: ParamOverrides,
}

/// Resolve config and parameters for a direct phase invocation
async fn prepare(
    state: &AppState,
    config_id: Uuid,
    overrides: &ParamOverrides,
) -> ApiResult<(PhaseContext, InsightConfig, TaxonomyParams)> {
    let ctx = state.ctx.with_cancel(CancellationToken::new());
    let config = load_config(&ctx, config_id).await?;

    if state.is_running(config_id).await {
        return Err(ApiError::Conflict(format!(
            "Pipeline is running for config {}",
            config_id
        )));
    }

    let params = overrides
        .apply(&config.params)
        .map_err(ApiError::BadRequest)?;
    Ok((ctx, config, params))
}

/// POST /phases/sample
pub async fn sample(
    State(state): State<AppState>,
    Json(request): Json<PhaseRequest>,
) -> ApiResult<Json<SampleReport>> {
    let (ctx, config, params) = prepare(&state, request.config_id, &request.overrides).await?;
    Ok(Json(run_sampling(&ctx, &config, &params).await?))
}

/// POST /phases/features
pub async fn features(
    State(state): State<AppState>,
    Json(request): Json<FeaturesRequest>,
) -> ApiResult<Json<FeatureExtractionReport>> {
    let (ctx, config, params) = prepare(&state, request.config_id, &request.overrides).await?;
    let work_list = match request.conversation_ids {
        Some(ids) => ids,
        None => sampled_conversation_ids(&ctx, &config).await?,
    };
    Ok(Json(extract_features(&ctx, &config, &params, &work_list).await?))
}

/// POST /phases/categories/discover
pub async fn categories_discover(
    State(state): State<AppState>,
    Json(request): Json<PhaseRequest>,
) -> ApiResult<Json<CategoryDiscoveryReport>> {
    let (ctx, config, params) = prepare(&state, request.config_id, &request.overrides).await?;
    Ok(Json(discover_categories(&ctx, &config, &params).await?))
}

/// POST /phases/categories/assign
pub async fn categories_assign(
    State(state): State<AppState>,
    Json(request): Json<PhaseRequest>,
) -> ApiResult<Json<CategoryAssignmentReport>> {
    let (ctx, config, params) = prepare(&state, request.config_id, &request.overrides).await?;
    Ok(Json(assign_categories(&ctx, &config, &params).await?))
}

/// POST /phases/subcategories/discover
pub async fn subcategories_discover(
    State(state): State<AppState>,
    Json(request): Json<PhaseRequest>,
) -> ApiResult<Json<SubcategoryDiscoveryReport>> {
    let (ctx, config, params) = prepare(&state, request.config_id, &request.overrides).await?;
    Ok(Json(discover_subcategories(&ctx, &config, &params).await?))
}

/// POST /phases/subcategories/assign
pub async fn subcategories_assign(
    State(state): State<AppState>,
    Json(request): Json<PhaseRequest>,
) -> ApiResult<Json<SubcategoryAssignmentReport>> {
    let (ctx, config, params) = prepare(&state, request.config_id, &request.overrides).await?;
    Ok(Json(assign_subcategories(&ctx, &config, &params).await?))
}

pub fn phase_routes() -> Router<AppState> {
    Router::new()
        .route("/phases/sample", post(sample))
        .route("/phases/features", post(features))
        .route("/phases/categories/discover", post(categories_discover))
        .route("/phases/categories/assign", post(categories_assign))
        .route("/phases/subcategories/discover", post(subcategories_discover))
        .route("/phases/subcategories/assign", post(subcategories_assign))
}

//! Pipeline API handlers
//!
//! POST /pipeline/run, GET /pipeline/:config_id, POST /pipeline/:config_id/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{configs, runs};
use crate::error::{ApiError, ApiResult};
use crate::models::PipelineRun;
use crate::services::PipelineOrchestrator;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunPipelineRequest {
    pub config_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatusResponse {
    #[serde(flatten)]
    pub run: PipelineRun,
    /// A background task is currently driving this run
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelPipelineResponse {
    pub config_id: Uuid,
    pub cancel_requested: bool,
}

/// POST /pipeline/run
///
/// Starts (or resumes) the pipeline in the background. Returns 202 with the
/// run as persisted before the first phase starts.
pub async fn run_pipeline(
    State(state): State<AppState>,
    Json(request): Json<RunPipelineRequest>,
) -> ApiResult<(StatusCode, Json<PipelineStatusResponse>)> {
    let config_id = request.config_id;
    if configs::load_config(&state.ctx.db, config_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Config not found: {}", config_id)));
    }

    let cancel_token = CancellationToken::new();
    {
        let mut tokens = state.cancellation_tokens.write().await;
        if tokens.contains_key(&config_id) {
            return Err(ApiError::Conflict(format!(
                "Pipeline already running for config {}",
                config_id
            )));
        }
        tokens.insert(config_id, cancel_token.clone());
    }

    let run = match runs::get_or_create_run(&state.ctx.db, config_id).await {
        Ok(run) => run,
        Err(e) => {
            state.cancellation_tokens.write().await.remove(&config_id);
            return Err(e.into());
        }
    };

    let state_clone = state.clone();
    tokio::spawn(async move {
        tracing::info!(config_id = %config_id, "Background pipeline task started");
        execute_pipeline(state_clone, config_id, cancel_token).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(PipelineStatusResponse { run, active: true }),
    ))
}

/// Background task body; always releases the config's cancellation token
async fn execute_pipeline(state: AppState, config_id: Uuid, cancel_token: CancellationToken) {
    let orchestrator = PipelineOrchestrator::new(state.ctx.clone());

    match orchestrator.execute(config_id, cancel_token).await {
        Ok(run) => {
            tracing::info!(
                config_id = %config_id,
                state = run.state.as_str(),
                status = run.status.as_str(),
                "Background pipeline task finished"
            );
        }
        Err(e) => {
            tracing::error!(config_id = %config_id, error = %e, "Background pipeline task failed");
            *state.last_error.write().await = Some(format!("config {}: {}", config_id, e));
        }
    }

    state.cancellation_tokens.write().await.remove(&config_id);
}

/// GET /pipeline/:config_id
pub async fn get_pipeline_status(
    State(state): State<AppState>,
    Path(config_id): Path<Uuid>,
) -> ApiResult<Json<PipelineStatusResponse>> {
    let run = runs::load_run(&state.ctx.db, config_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No pipeline run for config {}", config_id)))?;

    Ok(Json(PipelineStatusResponse {
        run,
        active: state.is_running(config_id).await,
    }))
}

/// POST /pipeline/:config_id/cancel
///
/// Signals the background task; the run is marked cancelled once it stops.
pub async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(config_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelPipelineResponse>)> {
    let tokens = state.cancellation_tokens.read().await;
    let token = tokens.get(&config_id).ok_or_else(|| {
        ApiError::Conflict(format!("No running pipeline for config {}", config_id))
    })?;
    token.cancel();

    tracing::info!(config_id = %config_id, "Pipeline cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelPipelineResponse {
            config_id,
            cancel_requested: true,
        }),
    ))
}

pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/run", post(run_pipeline))
        .route("/pipeline/:config_id", get(get_pipeline_status))
        .route("/pipeline/:config_id/cancel", post(cancel_pipeline))
}

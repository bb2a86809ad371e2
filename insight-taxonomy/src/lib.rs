//! insight-taxonomy library interface
//!
//! Exposes the pipeline phases, persistence, and HTTP surface for the
//! binary and for integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, PipelineError, PipelineResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::PhaseContext;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database, oracle, conversation source and event bus
    pub ctx: PhaseContext,
    /// Cancellation tokens of pipelines running in the background, by config
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    pub startup_time: DateTime<Utc>,
    /// Last background pipeline error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(ctx: PhaseContext) -> Self {
        Self {
            ctx,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn is_running(&self, config_id: Uuid) -> bool {
        self.cancellation_tokens.read().await.contains_key(&config_id)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::config_routes())
        .merge(api::phase_routes())
        .merge(api::pipeline_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}

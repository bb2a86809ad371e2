//! Orchestrator integration tests
//!
//! Full runs, resume after failure, and cancellation between phases.

mod helpers;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use helpers::{default_oracle, setup, support_source, test_params, ScriptedOracle};
use insight_common::events::InsightEvent;
use insight_taxonomy::db::{assignments, categories, runs};
use insight_taxonomy::models::{PipelineState, RunStatus};
use insight_taxonomy::services::{
    ClassificationOracle, OracleError, OracleRequest, PhaseContext, PipelineOrchestrator,
};
use insight_taxonomy::PipelineError;

/// Cancels `token` once `after` requests for `schema_name` are answered
struct CancelAfter {
    inner: ScriptedOracle,
    schema_name: &'static str,
    after: usize,
    answered: AtomicUsize,
    token: CancellationToken,
}

impl CancelAfter {
    fn new(schema_name: &'static str, after: usize, token: CancellationToken) -> Self {
        Self {
            inner: default_oracle(),
            schema_name,
            after,
            answered: AtomicUsize::new(0),
            token,
        }
    }
}

#[async_trait]
impl ClassificationOracle for CancelAfter {
    async fn classify(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let response = self.inner.classify(request).await;
        if request.schema.name == self.schema_name
            && self.answered.fetch_add(1, Ordering::SeqCst) + 1 >= self.after
        {
            self.token.cancel();
        }
        response
    }
}

#[tokio::test]
async fn full_run_reaches_the_final_state() {
    let env = setup(support_source(), default_oracle(), test_params()).await;
    let mut events = env.ctx.event_bus.subscribe();

    let orchestrator = PipelineOrchestrator::new(env.ctx.clone());
    let run = orchestrator
        .execute(env.config.config_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, PipelineState::SubcategoriesAssigned);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.last_error.is_none());

    let stats = &run.statistics;
    assert_eq!(stats.sampled, 18);
    assert_eq!(stats.features_included, 18);
    assert_eq!(stats.conversations_assigned, 18);
    assert_eq!(stats.subcategory_assignments, 18);
    assert_eq!(stats.categories.len(), 3);
    assert_eq!(stats.subcategories.len(), 6);
    assert_eq!(stats.error_count, 0);

    let stored = runs::load_run(&env.ctx.db, env.config.config_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, PipelineState::SubcategoriesAssigned);
    assert_eq!(stored.statistics, run.statistics);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.event_type().to_string());
    }
    assert_eq!(names.first().map(String::as_str), Some("PipelineStarted"));
    assert_eq!(names.last().map(String::as_str), Some("PipelineCompleted"));
    assert_eq!(names.iter().filter(|n| *n == "PhaseCompleted").count(), 6);
}

#[tokio::test]
async fn completed_run_is_returned_without_further_work() {
    let env = setup(support_source(), default_oracle(), test_params()).await;
    let orchestrator = PipelineOrchestrator::new(env.ctx.clone());

    let first = orchestrator
        .execute(env.config.config_id, CancellationToken::new())
        .await
        .unwrap();
    let calls = env.oracle.total_calls.load(Ordering::SeqCst);

    let second = orchestrator
        .execute(env.config.config_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.state, first.state);
    assert_eq!(second.statistics, first.statistics);
    assert_eq!(env.oracle.total_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn unknown_config_is_not_found() {
    let env = setup(support_source(), default_oracle(), test_params()).await;
    let orchestrator = PipelineOrchestrator::new(env.ctx.clone());

    let result = orchestrator
        .execute(uuid::Uuid::new_v4(), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn failed_run_resumes_from_its_last_completed_state() {
    let oracle = default_oracle().failing_on("category_discovery");
    let env = setup(support_source(), oracle, test_params()).await;

    let result = PipelineOrchestrator::new(env.ctx.clone())
        .execute(env.config.config_id, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(PipelineError::Oracle(_))));

    let failed = runs::load_run(&env.ctx.db, env.config.config_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.state, PipelineState::FeaturesExtracted);
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.last_error.is_some());

    // Same database, working oracle
    let oracle = Arc::new(default_oracle());
    let ctx = PhaseContext::new(
        env.ctx.db.clone(),
        oracle.clone(),
        env.source.clone(),
        env.ctx.event_bus.clone(),
    );
    let list_calls = env.source.list_calls.load(Ordering::SeqCst);

    let resumed = PipelineOrchestrator::new(ctx)
        .execute(env.config.config_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resumed.state, PipelineState::SubcategoriesAssigned);
    assert_eq!(resumed.status, RunStatus::Completed);
    assert!(resumed.last_error.is_none());
    // Sampling and extraction were not repeated
    assert_eq!(oracle.calls_for("conversation_features"), 0);
    assert_eq!(env.source.list_calls.load(Ordering::SeqCst), list_calls);
    assert_eq!(oracle.calls_for("category_discovery"), 1);
}

#[tokio::test]
async fn cancelled_before_start_records_nothing() {
    let env = setup(support_source(), default_oracle(), test_params()).await;
    let token = CancellationToken::new();
    token.cancel();

    let run = PipelineOrchestrator::new(env.ctx.clone())
        .execute(env.config.config_id, token)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.state, PipelineState::Sampling);
    assert_eq!(env.oracle.total_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_between_phases_keeps_completed_work() {
    let env = setup(support_source(), default_oracle(), test_params()).await;
    let token = CancellationToken::new();
    let oracle = Arc::new(CancelAfter::new("category_discovery", 1, token.clone()));
    let ctx = PhaseContext::new(
        env.ctx.db.clone(),
        oracle,
        env.source.clone(),
        env.ctx.event_bus.clone(),
    );
    let mut events = env.ctx.event_bus.subscribe();

    let run = PipelineOrchestrator::new(ctx.clone())
        .execute(env.config.config_id, token)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.state, PipelineState::CategoriesDiscovered);
    assert_eq!(
        categories::load_categories(&env.ctx.db, env.config.config_id)
            .await
            .unwrap()
            .len(),
        3
    );

    let mut cancelled = None;
    while let Ok(event) = events.try_recv() {
        if let InsightEvent::PipelineCancelled { phase, .. } = event {
            cancelled = Some(phase);
        }
    }
    assert_eq!(cancelled.as_deref(), Some("categories_assigned"));

    // A fresh token resumes from the recorded state
    let resumed = PipelineOrchestrator::new(ctx)
        .execute(env.config.config_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.state, PipelineState::SubcategoriesAssigned);
}

#[tokio::test]
async fn cancellation_during_assignment_leaves_persisted_rows_intact() {
    let env = setup(support_source(), default_oracle(), test_params()).await;
    let config_id = env.config.config_id;
    let token = CancellationToken::new();
    let oracle = Arc::new(CancelAfter::new("category_assignment", 5, token.clone()));
    let ctx = PhaseContext::new(
        env.ctx.db.clone(),
        oracle.clone(),
        env.source.clone(),
        env.ctx.event_bus.clone(),
    );

    let run = PipelineOrchestrator::new(ctx.clone())
        .execute(config_id, token)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.state, PipelineState::CategoriesDiscovered);

    let answered = oracle.inner.calls_for("category_assignment");
    assert!(answered >= 5 && answered < 18, "answered {}", answered);

    let category_keys: Vec<String> = categories::load_categories(&env.ctx.db, config_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.category_key)
        .collect();
    let stored = assignments::load_assignments(&env.ctx.db, config_id)
        .await
        .unwrap();
    assert!(stored.len() <= answered);
    for row in &stored {
        let position = category_keys
            .iter()
            .position(|key| *key == row.category_key)
            .unwrap();
        assert_eq!(row.category_index, position);
        assert_eq!(row.category_confidence, 0.8);
        assert_eq!(row.category_reasoning, "keyword match");
        assert!(row.subcategory.is_none());
    }

    let resumed = PipelineOrchestrator::new(ctx)
        .execute(config_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.statistics.conversations_assigned, 18);

    let stored = categories::load_categories(&env.ctx.db, config_id)
        .await
        .unwrap();
    assert_eq!(stored.iter().map(|c| c.conversation_count).sum::<usize>(), 18);
    let total: f64 = stored.iter().map(|c| c.frequency_pct).sum();
    assert!((total - 100.0).abs() < 1e-6, "frequencies sum to {}", total);
}

#[tokio::test]
async fn zero_subcategories_still_completes_the_run() {
    let params = insight_taxonomy::models::TaxonomyParams {
        max_subcategories_per_category: 0,
        ..test_params()
    };
    let env = setup(support_source(), default_oracle(), params).await;

    let run = PipelineOrchestrator::new(env.ctx.clone())
        .execute(env.config.config_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.statistics.subcategories.is_empty());
    assert_eq!(run.statistics.subcategory_assignments, 0);
    assert_eq!(run.statistics.warning_count, 2);
}

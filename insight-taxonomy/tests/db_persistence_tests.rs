//! Resume across process restarts
//!
//! Uses an on-disk database so the second orchestrator sees only what the
//! first one persisted.

mod helpers;

use insight_common::events::EventBus;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use helpers::{default_oracle, new_config, support_source, test_params};
use insight_taxonomy::db::{configs, features, runs};
use insight_taxonomy::models::{InsightConfig, PipelineState, RunStatus};
use insight_taxonomy::services::{PhaseContext, PipelineOrchestrator};

#[tokio::test]
async fn run_resumes_after_reopening_the_database() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("insight.db");
    let config = InsightConfig::create(new_config(test_params())).unwrap();
    let source = Arc::new(support_source());

    {
        let pool = insight_common::db::init_database(&db_path).await.unwrap();
        configs::save_config(&pool, &config).await.unwrap();

        let oracle = Arc::new(default_oracle().failing_on("category_assignment"));
        let ctx = PhaseContext::new(pool.clone(), oracle, source.clone(), EventBus::new(64));

        // Assignment failures are per item, so the run completes with errors
        let run = PipelineOrchestrator::new(ctx)
            .execute(config.config_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.statistics.conversations_assigned, 0);
        assert!(run.statistics.error_count >= 18);

        pool.close().await;
    }

    let pool = insight_common::db::init_database(&db_path).await.unwrap();
    let stored = runs::load_run(&pool, config.config_id).await.unwrap().unwrap();
    assert_eq!(stored.state, PipelineState::SubcategoriesAssigned);
    assert_eq!(
        features::count_features(&pool, config.config_id).await.unwrap(),
        18
    );
    let reloaded = configs::require_config(&pool, config.config_id).await.unwrap();
    assert_eq!(reloaded, config);
}

#[tokio::test]
async fn failed_run_survives_restart_and_completes() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("insight.db");
    let config = InsightConfig::create(new_config(test_params())).unwrap();
    let source = Arc::new(support_source());

    {
        let pool = insight_common::db::init_database(&db_path).await.unwrap();
        configs::save_config(&pool, &config).await.unwrap();

        let oracle = Arc::new(default_oracle().failing_on("category_discovery"));
        let ctx = PhaseContext::new(pool.clone(), oracle, source.clone(), EventBus::new(64));
        assert!(PipelineOrchestrator::new(ctx)
            .execute(config.config_id, CancellationToken::new())
            .await
            .is_err());

        pool.close().await;
    }

    let pool = insight_common::db::init_database(&db_path).await.unwrap();
    let oracle = Arc::new(default_oracle());
    let ctx = PhaseContext::new(pool, oracle.clone(), source, EventBus::new(64));

    let run = PipelineOrchestrator::new(ctx)
        .execute(config.config_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.state, PipelineState::SubcategoriesAssigned);
    assert_eq!(oracle.calls_for("conversation_features"), 0);
}

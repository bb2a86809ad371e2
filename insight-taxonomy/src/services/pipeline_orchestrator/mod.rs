//! Pipeline orchestrator
//!
//! # State Progression
//! SAMPLING → FEATURES_EXTRACTED → CATEGORIES_DISCOVERED → CATEGORIES_ASSIGNED
//! → SUBCATEGORIES_DISCOVERED → SUBCATEGORIES_ASSIGNED
//!
//! The run row records the last completed state. Re-invoking for the same
//! config resumes after it; a completed run is returned unchanged. Phases
//! receive the config's `TaxonomyParams` by reference, loaded once here.

mod statistics;

use chrono::Utc;
use insight_common::events::InsightEvent;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    assign_categories, assign_subcategories, discover_categories, discover_subcategories,
    extract_features, feature_extractor::sampled_conversation_ids, run_sampling, PhaseContext,
    PHASE_CATEGORY_ASSIGNMENT, PHASE_CATEGORY_DISCOVERY, PHASE_FEATURE_EXTRACTION,
    PHASE_SAMPLING, PHASE_SUBCATEGORY_ASSIGNMENT, PHASE_SUBCATEGORY_DISCOVERY,
};
use crate::db::{configs, runs};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{InsightConfig, PhaseIssues, PipelineRun, PipelineState, TaxonomyParams};

/// Load a config, mapping absence to `PipelineError::NotFound`
pub async fn load_config(ctx: &PhaseContext, config_id: Uuid) -> PipelineResult<InsightConfig> {
    configs::load_config(&ctx.db, config_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("config {}", config_id)))
}

/// Pipeline orchestrator service
#[derive(Clone)]
pub struct PipelineOrchestrator {
    ctx: PhaseContext,
}

impl PipelineOrchestrator {
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    /// Run every remaining phase for `config_id`.
    ///
    /// Cancellation is observed between phases and between items. A
    /// cancelled run returns `Ok` with `status = cancelled`; a failed phase
    /// returns the error after recording it on the run.
    pub async fn execute(
        &self,
        config_id: Uuid,
        cancel_token: CancellationToken,
    ) -> PipelineResult<PipelineRun> {
        let start_time = Instant::now();
        let ctx = self.ctx.with_cancel(cancel_token);
        let config = load_config(&ctx, config_id).await?;
        let params = config.params.clone();

        let mut run = runs::get_or_create_run(&ctx.db, config_id).await?;
        if run.is_complete() {
            tracing::info!(config_id = %config_id, "Pipeline already complete");
            return Ok(run);
        }

        let resumed_from =
            (run.state != PipelineState::Sampling).then(|| run.state.as_str().to_string());
        run.resume();
        runs::save_run(&ctx.db, &run).await?;

        tracing::info!(
            config_id = %config_id,
            resumed_from = ?resumed_from,
            "Starting taxonomy pipeline"
        );
        ctx.event_bus.emit_lossy(InsightEvent::PipelineStarted {
            config_id,
            resumed_from,
            timestamp: Utc::now(),
        });

        while let Some(target) = run.state.next() {
            if ctx.cancel.is_cancelled() {
                return self.finish_cancelled(&ctx, run, target).await;
            }

            match self.run_step(&ctx, &config, &params, target, &mut run).await {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => {
                    return self.finish_cancelled(&ctx, run, target).await;
                }
                Err(e) => {
                    tracing::error!(
                        config_id = %config_id,
                        target = target.as_str(),
                        error = %e,
                        "Pipeline phase failed"
                    );
                    run.fail(e.to_string());
                    runs::save_run(&ctx.db, &run).await?;
                    ctx.event_bus.emit_lossy(InsightEvent::PipelineFailed {
                        config_id,
                        phase: target.as_str().to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(e);
                }
            }

            let previous = run.advance_to(target).map_err(PipelineError::Precondition)?;
            runs::save_run(&ctx.db, &run).await?;
            tracing::info!(
                config_id = %config_id,
                from = previous.as_str(),
                to = target.as_str(),
                "Pipeline state advanced"
            );
        }

        let duration_seconds = start_time.elapsed().as_secs();
        tracing::info!(
            config_id = %config_id,
            duration_seconds,
            sampled = run.statistics.sampled,
            features = run.statistics.features_included,
            assigned = run.statistics.conversations_assigned,
            errors = run.statistics.error_count,
            "Taxonomy pipeline completed"
        );
        ctx.event_bus.emit_lossy(InsightEvent::PipelineCompleted {
            config_id,
            duration_seconds,
            timestamp: Utc::now(),
        });

        Ok(run)
    }

    /// Execute the phase(s) that produce `target`
    async fn run_step(
        &self,
        ctx: &PhaseContext,
        config: &InsightConfig,
        params: &TaxonomyParams,
        target: PipelineState,
        run: &mut PipelineRun,
    ) -> PipelineResult<()> {
        let config_id = config.config_id;
        match target {
            PipelineState::Sampling => Ok(()),
            PipelineState::FeaturesExtracted => {
                self.phase_started(config_id, PHASE_SAMPLING);
                let sample = run_sampling(ctx, config, params).await?;
                run.statistics.record_sample(&sample);
                self.phase_completed(config_id, PHASE_SAMPLING, &sample.issues);
                ctx.ensure_not_cancelled()?;

                self.phase_started(config_id, PHASE_FEATURE_EXTRACTION);
                let work_list = sampled_conversation_ids(ctx, config).await?;
                let report = extract_features(ctx, config, params, &work_list).await?;
                run.statistics.record_features(&report);
                self.phase_completed(config_id, PHASE_FEATURE_EXTRACTION, &report.issues);
                Ok(())
            }
            PipelineState::CategoriesDiscovered => {
                self.phase_started(config_id, PHASE_CATEGORY_DISCOVERY);
                let report = discover_categories(ctx, config, params).await?;
                run.statistics.record_category_discovery(&report);
                self.phase_completed(config_id, PHASE_CATEGORY_DISCOVERY, &report.issues);
                Ok(())
            }
            PipelineState::CategoriesAssigned => {
                self.phase_started(config_id, PHASE_CATEGORY_ASSIGNMENT);
                let report = assign_categories(ctx, config, params).await?;
                run.statistics.record_category_assignment(&report);
                self.phase_completed(config_id, PHASE_CATEGORY_ASSIGNMENT, &report.issues);
                Ok(())
            }
            PipelineState::SubcategoriesDiscovered => {
                self.phase_started(config_id, PHASE_SUBCATEGORY_DISCOVERY);
                let report = discover_subcategories(ctx, config, params).await?;
                run.statistics.record_subcategory_discovery(&report);
                self.phase_completed(config_id, PHASE_SUBCATEGORY_DISCOVERY, &report.issues);
                Ok(())
            }
            PipelineState::SubcategoriesAssigned => {
                self.phase_started(config_id, PHASE_SUBCATEGORY_ASSIGNMENT);
                let report = assign_subcategories(ctx, config, params).await?;
                run.statistics.record_subcategory_assignment(&report);
                self.phase_completed(config_id, PHASE_SUBCATEGORY_ASSIGNMENT, &report.issues);
                Ok(())
            }
        }
    }

    async fn finish_cancelled(
        &self,
        ctx: &PhaseContext,
        mut run: PipelineRun,
        target: PipelineState,
    ) -> PipelineResult<PipelineRun> {
        tracing::info!(
            config_id = %run.config_id,
            state = run.state.as_str(),
            "Pipeline cancelled"
        );
        run.cancel();
        runs::save_run(&ctx.db, &run).await?;
        ctx.event_bus.emit_lossy(InsightEvent::PipelineCancelled {
            config_id: run.config_id,
            phase: target.as_str().to_string(),
            timestamp: Utc::now(),
        });
        Ok(run)
    }

    fn phase_started(&self, config_id: Uuid, phase: &str) {
        tracing::info!(config_id = %config_id, phase, "Phase started");
        self.ctx.event_bus.emit_lossy(InsightEvent::PhaseStarted {
            config_id,
            phase: phase.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn phase_completed(&self, config_id: Uuid, phase: &str, issues: &PhaseIssues) {
        tracing::info!(
            config_id = %config_id,
            phase,
            errors = issues.errors.len(),
            warnings = issues.warnings.len(),
            "Phase completed"
        );
        self.ctx.event_bus.emit_lossy(InsightEvent::PhaseCompleted {
            config_id,
            phase: phase.to_string(),
            error_count: issues.errors.len(),
            warning_count: issues.warnings.len(),
            timestamp: Utc::now(),
        });
    }
}

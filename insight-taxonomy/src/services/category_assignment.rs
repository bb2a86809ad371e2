//! Category assignment phase
//!
//! Every feature row is classified against the full category list. Each
//! assignment is persisted as soon as it resolves; statistics are recomputed
//! from the persisted rows once every item has finished.

use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::oracle::{classify_validated, FieldKind, OracleError, OracleRequest, OutputSchema};
use super::{retry_backoff, should_report_progress, PhaseContext, PHASE_CATEGORY_ASSIGNMENT};
use crate::db::assignments::{self, CategoryAssignmentWrite};
use crate::db::{categories, features};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Category, CategoryAssignmentReport, ConversationFeature, GroupStatistics, InsightConfig,
    TaxonomyParams, TaxonomyStatistic,
};
use crate::utils::{retry_with_budget, run_bounded};

pub(crate) const MAX_REASONING_LENGTH: usize = 500;

/// Oracle answer for one assignment, index still 1-based
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AssignmentResponse {
    pub index: usize,
    pub confidence: f64,
    pub reasoning: String,
}

/// A resolved assignment with a 0-based index
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedAssignment {
    pub index: usize,
    pub confidence: f64,
    pub reasoning: String,
}

pub(crate) fn assignment_schema(schema_name: &str, option_count: usize) -> OutputSchema {
    OutputSchema::new(schema_name)
        .field(
            "index",
            "Number of the best matching option",
            FieldKind::integer_range(1, option_count as i64),
        )
        .field("confidence", "Confidence from 0 to 1", FieldKind::confidence())
        .field(
            "reasoning",
            "One or two sentences explaining the choice",
            FieldKind::bounded_string(MAX_REASONING_LENGTH),
        )
}

/// `1. Name: summary` per option
pub(crate) fn render_options<'a>(options: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    options
        .into_iter()
        .enumerate()
        .map(|(i, (name, summary))| format!("{}. {}: {}", i + 1, name, summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Content sent for one conversation
pub(crate) fn assignment_content(feature: &ConversationFeature) -> String {
    format!("Conversation summary: {}", feature.semantic_string)
}

/// Classify within the retry budget and convert to a 0-based index
pub(crate) async fn request_assignment(
    ctx: &PhaseContext,
    params: &TaxonomyParams,
    operation: &str,
    request: &OracleRequest,
) -> Result<ResolvedAssignment, OracleError> {
    retry_with_budget(operation, params.retry_attempts, retry_backoff(params), |_| async move {
        let response: AssignmentResponse =
            classify_validated(ctx.oracle.as_ref(), request).await?;
        let reasoning = response.reasoning.trim().to_string();
        if reasoning.is_empty() {
            return Err(OracleError::SchemaViolation("reasoning is empty".to_string()));
        }
        // The schema bounds the index to 1..=N
        Ok(ResolvedAssignment {
            index: response.index.saturating_sub(1),
            confidence: response.confidence,
            reasoning,
        })
    })
    .await
}

fn assignment_instructions(config: &InsightConfig, categories: &[Category]) -> String {
    format!(
        "{}\n\nAssign the conversation to exactly one of these categories:\n{}\n\n\
         Answer with the category number, a confidence between 0 and 1, and brief reasoning.",
        config.analysis_context(),
        render_options(categories.iter().map(|c| (c.name.as_str(), c.summary.as_str())))
    )
}

#[derive(Debug)]
enum ItemOutcome {
    Assigned,
    Failed(String),
}

async fn assign_one(
    ctx: &PhaseContext,
    params: &TaxonomyParams,
    categories: &[Category],
    schema: &OutputSchema,
    instructions: &str,
    feature: &ConversationFeature,
) -> ItemOutcome {
    let request = OracleRequest::new(assignment_content(feature), schema.clone())
        .with_instructions(instructions.to_string());

    let resolved = match request_assignment(ctx, params, "assign_category", &request).await {
        Ok(resolved) => resolved,
        Err(e) => {
            return ItemOutcome::Failed(format!("conversation {}: {}", feature.conversation_id, e))
        }
    };

    let Some(category) = categories.get(resolved.index) else {
        return ItemOutcome::Failed(format!(
            "conversation {}: category index {} out of range",
            feature.conversation_id,
            resolved.index + 1
        ));
    };

    let write = CategoryAssignmentWrite {
        config_id: feature.config_id,
        conversation_id: &feature.conversation_id,
        category_key: &category.category_key,
        category_index: category.category_index,
        confidence: resolved.confidence,
        reasoning: &resolved.reasoning,
    };

    match assignments::upsert_category_assignment(&ctx.db, &write).await {
        Ok(()) => {
            tracing::debug!(
                conversation_id = %feature.conversation_id,
                category = %category.name,
                confidence = resolved.confidence,
                "Conversation assigned"
            );
            ItemOutcome::Assigned
        }
        Err(e) => ItemOutcome::Failed(format!(
            "conversation {}: failed to persist assignment: {}",
            feature.conversation_id, e
        )),
    }
}

/// Recompute and persist per-category statistics from stored assignments
pub async fn refresh_category_statistics(
    ctx: &PhaseContext,
    config: &InsightConfig,
) -> PipelineResult<Vec<Category>> {
    let mut categories = categories::load_categories(&ctx.db, config.config_id).await?;
    let stored = assignments::load_assignments(&ctx.db, config.config_id).await?;

    let statistics = GroupStatistics::compute(
        categories.len(),
        stored
            .iter()
            .map(|a| (a.category_index, a.category_confidence)),
    );

    for (category, stats) in categories.iter_mut().zip(statistics) {
        categories::update_category_statistics(&ctx.db, &category.category_key, &stats).await?;
        category.conversation_count = stats.conversation_count;
        category.frequency_pct = stats.frequency_pct;
        category.avg_confidence = stats.avg_confidence;
    }

    Ok(categories)
}

pub async fn assign_categories(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
) -> PipelineResult<CategoryAssignmentReport> {
    let config_id = config.config_id;
    let categories = categories::load_categories(&ctx.db, config_id).await?;
    if categories.is_empty() {
        return Err(PipelineError::Precondition(format!(
            "config {} has no categories; run category discovery first",
            config_id
        )));
    }

    let rows = features::load_features(&ctx.db, config_id).await?;
    let mut report = CategoryAssignmentReport::default();
    if rows.is_empty() {
        report.issues.warn("no feature rows to assign");
        return Ok(report);
    }

    tracing::info!(
        config_id = %config_id,
        conversations = rows.len(),
        categories = categories.len(),
        concurrency = params.concurrency,
        "Assigning conversations to categories"
    );

    let schema = assignment_schema("category_assignment", categories.len());
    let instructions = assignment_instructions(config, &categories);
    let total = rows.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let outcomes = run_bounded(&rows, params.concurrency, &ctx.cancel, |feature| {
        let categories = &categories;
        let schema = &schema;
        let instructions = &instructions;
        let completed = Arc::clone(&completed);
        let failed = Arc::clone(&failed);
        async move {
            let outcome =
                assign_one(ctx, params, categories, schema, instructions, feature).await;

            if matches!(outcome, ItemOutcome::Failed(_)) {
                failed.fetch_add(1, Ordering::SeqCst);
            }
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if should_report_progress(done, total) {
                ctx.emit_progress(
                    config_id,
                    PHASE_CATEGORY_ASSIGNMENT,
                    done,
                    total,
                    failed.load(Ordering::SeqCst),
                );
            }
            outcome
        }
    })
    .await;

    ctx.ensure_not_cancelled()?;

    for outcome in outcomes {
        report.processed += 1;
        match outcome {
            ItemOutcome::Assigned => report.assigned += 1,
            ItemOutcome::Failed(message) => {
                tracing::warn!(config_id = %config_id, error = %message, "Category assignment failed");
                report.failed += 1;
                report.issues.error(message);
            }
        }
    }

    let updated = refresh_category_statistics(ctx, config).await?;
    report.statistics = updated.iter().map(TaxonomyStatistic::from).collect();

    tracing::info!(
        config_id = %config_id,
        processed = report.processed,
        assigned = report.assigned,
        failed = report.failed,
        "Category assignment complete"
    );

    Ok(report)
}

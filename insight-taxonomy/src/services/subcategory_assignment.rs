//! Subcategory assignment phase
//!
//! Members of each category that has subcategories are classified against
//! that category's subcategory list. Only the subcategory columns of the
//! existing assignment row are written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::category_assignment::{
    assignment_content, assignment_schema, render_options, request_assignment,
};
use super::oracle::{OracleRequest, OutputSchema};
use super::{should_report_progress, PhaseContext, PHASE_SUBCATEGORY_ASSIGNMENT};
use crate::db::{assignments, categories, features, subcategories};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Category, CategoryAssignment, ConversationFeature, GroupStatistics, InsightConfig,
    Subcategory, SubcategoryAssignment, SubcategoryAssignmentReport, TaxonomyParams,
    TaxonomyStatistic,
};
use crate::utils::run_bounded;

/// Everything needed to classify members of one category
struct CategoryScope {
    category: Category,
    subcategories: Vec<Subcategory>,
    schema: OutputSchema,
    instructions: String,
}

#[derive(Debug)]
enum ItemOutcome {
    Assigned,
    Failed(String),
}

fn scope_instructions(config: &InsightConfig, category: &Category, subs: &[Subcategory]) -> String {
    format!(
        "{}\n\nThe conversation belongs to the category \"{}\". Assign it to exactly one \
         of these subcategories:\n{}\n\nAnswer with the subcategory number, a confidence \
         between 0 and 1, and brief reasoning.",
        config.analysis_context(),
        category.name,
        render_options(subs.iter().map(|s| (s.name.as_str(), s.summary.as_str())))
    )
}

/// Statistics for one category's subcategories.
///
/// Frequencies are relative to every member of the category, including
/// members without a subcategory. Subcategory columns that do not belong to
/// `subs` are ignored.
pub fn subcategory_statistics(
    subs: &[Subcategory],
    members: &[CategoryAssignment],
) -> Vec<GroupStatistics> {
    let positions: HashMap<&str, usize> = subs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.subcategory_key.as_str(), i))
        .collect();

    let mut statistics = GroupStatistics::compute(
        subs.len(),
        members.iter().filter_map(|a| {
            let sub = a.subcategory.as_ref()?;
            let position = positions.get(sub.subcategory_key.as_str())?;
            Some((*position, sub.confidence))
        }),
    );

    let total = members.len();
    for stats in &mut statistics {
        stats.frequency_pct = if total > 0 {
            stats.conversation_count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
    }
    statistics
}

async fn assign_one(
    ctx: &PhaseContext,
    params: &TaxonomyParams,
    scope: &CategoryScope,
    feature: &ConversationFeature,
) -> ItemOutcome {
    let request = OracleRequest::new(assignment_content(feature), scope.schema.clone())
        .with_instructions(scope.instructions.clone());

    let resolved = match request_assignment(ctx, params, "assign_subcategory", &request).await {
        Ok(resolved) => resolved,
        Err(e) => {
            return ItemOutcome::Failed(format!("conversation {}: {}", feature.conversation_id, e))
        }
    };

    let Some(subcategory) = scope.subcategories.get(resolved.index) else {
        return ItemOutcome::Failed(format!(
            "conversation {}: subcategory index {} out of range",
            feature.conversation_id,
            resolved.index + 1
        ));
    };

    let merge = SubcategoryAssignment {
        subcategory_key: subcategory.subcategory_key.clone(),
        subcategory_index: subcategory.subcategory_index,
        confidence: resolved.confidence,
        reasoning: resolved.reasoning,
    };

    match assignments::merge_subcategory_assignment(
        &ctx.db,
        feature.config_id,
        &feature.conversation_id,
        &merge,
    )
    .await
    {
        Ok(()) => ItemOutcome::Assigned,
        Err(e) => ItemOutcome::Failed(format!(
            "conversation {}: failed to merge subcategory: {}",
            feature.conversation_id, e
        )),
    }
}

/// Recompute and persist subcategory statistics for every scope
async fn refresh_subcategory_statistics(
    ctx: &PhaseContext,
    config: &InsightConfig,
    scopes: &[CategoryScope],
) -> PipelineResult<Vec<Subcategory>> {
    let mut refreshed = Vec::new();
    for scope in scopes {
        let members = assignments::load_assignments_in_category(
            &ctx.db,
            config.config_id,
            &scope.category.category_key,
        )
        .await?;
        let statistics = subcategory_statistics(&scope.subcategories, &members);

        for (subcategory, stats) in scope.subcategories.iter().zip(statistics) {
            subcategories::update_subcategory_statistics(
                &ctx.db,
                &subcategory.subcategory_key,
                &stats,
            )
            .await?;
            let mut updated = subcategory.clone();
            updated.conversation_count = stats.conversation_count;
            updated.frequency_pct = stats.frequency_pct;
            updated.avg_confidence = stats.avg_confidence;
            refreshed.push(updated);
        }
    }
    Ok(refreshed)
}

pub async fn assign_subcategories(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
) -> PipelineResult<SubcategoryAssignmentReport> {
    let config_id = config.config_id;
    let mut report = SubcategoryAssignmentReport::default();

    if params.max_subcategories_per_category == 0 {
        report
            .issues
            .warn("max_subcategories_per_category is 0; subcategory assignment skipped");
        return Ok(report);
    }

    let all_categories = categories::load_categories(&ctx.db, config_id).await?;
    if all_categories.is_empty() {
        return Err(PipelineError::Precondition(format!(
            "config {} has no categories; run category discovery first",
            config_id
        )));
    }

    let mut by_category: HashMap<String, Vec<Subcategory>> = HashMap::new();
    for subcategory in subcategories::load_subcategories(&ctx.db, config_id).await? {
        by_category
            .entry(subcategory.category_key.clone())
            .or_default()
            .push(subcategory);
    }

    let scopes: Vec<CategoryScope> = all_categories
        .into_iter()
        .filter(|category| category.conversation_count >= params.min_category_size)
        .filter_map(|category| {
            let subs = by_category.remove(&category.category_key)?;
            Some(CategoryScope {
                schema: assignment_schema("subcategory_assignment", subs.len()),
                instructions: scope_instructions(config, &category, &subs),
                category,
                subcategories: subs,
            })
        })
        .collect();

    if scopes.is_empty() {
        report
            .issues
            .warn("no category has subcategories; nothing to assign");
        return Ok(report);
    }

    let mut work = Vec::new();
    for (position, scope) in scopes.iter().enumerate() {
        let members =
            features::load_features_in_category(&ctx.db, config_id, &scope.category.category_key)
                .await?;
        work.extend(members.into_iter().map(|feature| (position, feature)));
    }

    tracing::info!(
        config_id = %config_id,
        categories = scopes.len(),
        conversations = work.len(),
        concurrency = params.concurrency,
        "Assigning conversations to subcategories"
    );

    let total = work.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let outcomes = run_bounded(&work, params.concurrency, &ctx.cancel, |(position, feature)| {
        let scope = &scopes[*position];
        let completed = Arc::clone(&completed);
        let failed = Arc::clone(&failed);
        async move {
            let outcome = assign_one(ctx, params, scope, feature).await;

            if matches!(outcome, ItemOutcome::Failed(_)) {
                failed.fetch_add(1, Ordering::SeqCst);
            }
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if should_report_progress(done, total) {
                ctx.emit_progress(
                    config_id,
                    PHASE_SUBCATEGORY_ASSIGNMENT,
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
                tracing::warn!(config_id = %config_id, error = %message, "Subcategory assignment failed");
                report.failed += 1;
                report.issues.error(message);
            }
        }
    }

    let refreshed = refresh_subcategory_statistics(ctx, config, &scopes).await?;
    report.statistics = refreshed.iter().map(TaxonomyStatistic::from).collect();

    tracing::info!(
        config_id = %config_id,
        processed = report.processed,
        assigned = report.assigned,
        failed = report.failed,
        "Subcategory assignment complete"
    );

    Ok(report)
}

//! Subcategory discovery phase
//!
//! Each category that reached `min_category_size` gets its own discovery
//! call over the digest of its member conversations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::category_discovery::{build_digest, discovery_schema, name_warnings, request_groups};
use super::oracle::OracleRequest;
use super::{PhaseContext, PHASE_SUBCATEGORY_DISCOVERY};
use crate::db::{categories, features, subcategories};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Category, InsightConfig, Subcategory, SubcategoryDiscoveryReport, TaxonomyParams,
    TaxonomyStatistic,
};
use crate::utils::run_bounded;

/// Fewest subcategories requested when the maximum allows it
const MIN_SUBCATEGORIES: usize = 2;

#[derive(Debug)]
enum CategoryOutcome {
    Created {
        subcategories: Vec<Subcategory>,
        warnings: Vec<String>,
    },
    Skipped(String),
    Failed(String),
}

fn subcategory_instructions(
    config: &InsightConfig,
    category: &Category,
    min: usize,
    max: usize,
) -> String {
    format!(
        "{}\n\nEvery numbered line summarizes a conversation already placed in the \
         category \"{}\" ({}). Propose between {} and {} mutually distinct subcategories \
         within this category. Give each a name of two to four words, a summary of what \
         it reveals about the question, and representative line numbers.",
        config.analysis_context(),
        category.name,
        category.summary,
        min,
        max
    )
}

async fn discover_for_category(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
    category: &Category,
) -> CategoryOutcome {
    let members = match features::load_features_in_category(
        &ctx.db,
        config.config_id,
        &category.category_key,
    )
    .await
    {
        Ok(members) => members,
        Err(e) => {
            return CategoryOutcome::Failed(format!(
                "category '{}': failed to load members: {}",
                category.name, e
            ))
        }
    };

    if members.is_empty() {
        let cleared = subcategories::clear_category_subcategories(
            &ctx.db,
            config.config_id,
            &category.category_key,
        )
        .await;
        if let Err(e) = cleared {
            return CategoryOutcome::Failed(format!(
                "category '{}': failed to clear subcategories: {}",
                category.name, e
            ));
        }
        return CategoryOutcome::Skipped(format!(
            "category '{}' has no assigned conversations with features",
            category.name
        ));
    }

    let max = params.max_subcategories_per_category;
    let min = MIN_SUBCATEGORIES.min(max);
    let schema = discovery_schema("subcategory_discovery", "subcategories", min, max, members.len());
    let request = OracleRequest::new(build_digest(&members), schema)
        .with_instructions(subcategory_instructions(config, category, min, max));

    let groups =
        match request_groups(ctx, params, "discover_subcategories", "subcategories", &request)
            .await
        {
            Ok(groups) => groups,
            Err(e) => {
                return CategoryOutcome::Failed(format!("category '{}': {}", category.name, e))
            }
        };

    let warnings = name_warnings(&groups)
        .into_iter()
        .map(|w| format!("category '{}': {}", category.name, w))
        .collect();

    let discovered: Vec<Subcategory> = groups
        .into_iter()
        .enumerate()
        .map(|(index, g)| {
            Subcategory::discovered(category, index, g.name, g.summary, g.representative_indices)
        })
        .collect();

    if let Err(e) =
        subcategories::replace_subcategories(&ctx.db, &category.category_key, &discovered).await
    {
        return CategoryOutcome::Failed(format!(
            "category '{}': failed to persist subcategories: {}",
            category.name, e
        ));
    }

    tracing::debug!(
        category = %category.name,
        members = members.len(),
        subcategories = discovered.len(),
        "Subcategories discovered"
    );

    CategoryOutcome::Created {
        subcategories: discovered,
        warnings,
    }
}

pub async fn discover_subcategories(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
) -> PipelineResult<SubcategoryDiscoveryReport> {
    let config_id = config.config_id;
    let mut report = SubcategoryDiscoveryReport::default();

    if params.max_subcategories_per_category == 0 {
        report
            .issues
            .warn("max_subcategories_per_category is 0; subcategory discovery skipped");
        return Ok(report);
    }

    let all_categories = categories::load_categories(&ctx.db, config_id).await?;
    if all_categories.is_empty() {
        return Err(PipelineError::Precondition(format!(
            "config {} has no categories; run category discovery first",
            config_id
        )));
    }

    let (qualifying, below): (Vec<Category>, Vec<Category>) = all_categories
        .into_iter()
        .partition(|c| c.conversation_count >= params.min_category_size);

    // Earlier discoveries may have left subcategories on a category that has
    // since shrunk; its members keep category-only assignments.
    for category in &below {
        let cleared =
            subcategories::clear_category_subcategories(&ctx.db, config_id, &category.category_key)
                .await?;
        if cleared > 0 {
            tracing::debug!(
                category = %category.name,
                cleared,
                "Cleared stale subcategory assignments"
            );
        }
        report.categories_skipped += 1;
        report.issues.warn(format!(
            "category '{}' has {} conversations, below the minimum of {}; skipped",
            category.name, category.conversation_count, params.min_category_size
        ));
    }

    if qualifying.is_empty() {
        report
            .issues
            .warn("no category meets the minimum size for subcategory discovery");
        return Ok(report);
    }

    tracing::info!(
        config_id = %config_id,
        qualifying = qualifying.len(),
        skipped = below.len(),
        max_subcategories = params.max_subcategories_per_category,
        "Discovering subcategories"
    );

    let total = qualifying.len();
    let completed = Arc::new(AtomicUsize::new(0));

    let outcomes = run_bounded(&qualifying, params.concurrency, &ctx.cancel, |category| {
        let completed = Arc::clone(&completed);
        async move {
            let outcome = discover_for_category(ctx, config, params, category).await;
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.emit_progress(config_id, PHASE_SUBCATEGORY_DISCOVERY, done, total, 0);
            outcome
        }
    })
    .await;

    ctx.ensure_not_cancelled()?;

    let mut created = Vec::new();
    for outcome in outcomes {
        match outcome {
            CategoryOutcome::Created {
                subcategories,
                warnings,
            } => {
                report.categories_processed += 1;
                report.subcategories_created += subcategories.len();
                created.extend(subcategories);
                for warning in warnings {
                    report.issues.warn(warning);
                }
            }
            CategoryOutcome::Skipped(message) => {
                report.categories_skipped += 1;
                report.issues.warn(message);
            }
            CategoryOutcome::Failed(message) => {
                tracing::warn!(config_id = %config_id, error = %message, "Subcategory discovery failed");
                report.categories_processed += 1;
                report.issues.error(message);
            }
        }
    }

    created.sort_by_key(|s| (s.category_index, s.subcategory_index));
    report.statistics = created.iter().map(TaxonomyStatistic::from).collect();

    tracing::info!(
        config_id = %config_id,
        categories_processed = report.categories_processed,
        categories_skipped = report.categories_skipped,
        subcategories_created = report.subcategories_created,
        "Subcategory discovery complete"
    );

    Ok(report)
}

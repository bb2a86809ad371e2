//! Category discovery phase
//!
//! A single oracle call over the numbered digest of every feature row
//! proposes exactly `max_top_level_categories` categories.

use serde::Deserialize;
use serde_json::Value;

use super::oracle::{classify_validated, FieldKind, OracleError, OracleRequest, OutputSchema};
use super::{retry_backoff, PhaseContext, PHASE_CATEGORY_DISCOVERY};
use crate::db::{categories, features};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Category, CategoryDiscoveryReport, ConversationFeature, InsightConfig, TaxonomyParams,
    TaxonomyStatistic,
};
use crate::utils::retry_with_budget;

pub(crate) const MIN_REPRESENTATIVES: usize = 5;
pub(crate) const MAX_REPRESENTATIVES: usize = 10;
pub(crate) const MAX_NAME_LENGTH: usize = 60;
pub(crate) const MAX_NAME_WORDS: usize = 4;
pub(crate) const MAX_SUMMARY_LENGTH: usize = 600;

/// One group proposed by a discovery call
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DiscoveredGroup {
    pub name: String,
    pub summary: String,
    pub representative_indices: Vec<usize>,
}

/// `1. <semantic string>` per line, 1-based
pub fn build_digest(features: &[ConversationFeature]) -> String {
    features
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {}", i + 1, f.semantic_string))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Schema for a discovery call over a digest of `digest_len` lines
pub(crate) fn discovery_schema(
    schema_name: &str,
    list_field: &str,
    min_groups: usize,
    max_groups: usize,
    digest_len: usize,
) -> OutputSchema {
    let group = OutputSchema::new("group")
        .field(
            "name",
            "Two to four word name",
            FieldKind::bounded_string(MAX_NAME_LENGTH),
        )
        .field(
            "summary",
            "What this group says about the analytical question",
            FieldKind::bounded_string(MAX_SUMMARY_LENGTH),
        )
        .field(
            "representative_indices",
            "Line numbers of conversations that best represent this group",
            FieldKind::IntegerList {
                min: Some(1),
                max: Some(digest_len as i64),
                min_items: MIN_REPRESENTATIVES.min(digest_len),
                max_items: Some(MAX_REPRESENTATIVES),
            },
        );

    OutputSchema::new(schema_name).field(
        list_field,
        "Mutually distinct groups covering the conversations",
        FieldKind::ObjectList {
            item: group,
            min_items: min_groups,
            max_items: Some(max_groups),
        },
    )
}

/// Run a discovery request within the retry budget and parse the groups
pub(crate) async fn request_groups(
    ctx: &PhaseContext,
    params: &TaxonomyParams,
    operation: &str,
    list_field: &str,
    request: &OracleRequest,
) -> Result<Vec<DiscoveredGroup>, OracleError> {
    retry_with_budget(operation, params.retry_attempts, retry_backoff(params), |_| async move {
        let mut value: Value = classify_validated(ctx.oracle.as_ref(), request).await?;
        let groups = value.get_mut(list_field).map(Value::take).unwrap_or(Value::Null);
        serde_json::from_value::<Vec<DiscoveredGroup>>(groups)
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))
    })
    .await
    .map(|groups| groups.into_iter().map(normalize_group).collect())
}

fn normalize_group(mut group: DiscoveredGroup) -> DiscoveredGroup {
    group.name = group.name.trim().to_string();
    group.summary = group.summary.trim().to_string();
    let mut seen = std::collections::HashSet::new();
    group.representative_indices.retain(|i| seen.insert(*i));
    group
}

/// Warnings for names longer than the word budget
pub(crate) fn name_warnings(groups: &[DiscoveredGroup]) -> Vec<String> {
    groups
        .iter()
        .filter(|g| g.name.split_whitespace().count() > MAX_NAME_WORDS)
        .map(|g| format!("name '{}' is longer than {} words", g.name, MAX_NAME_WORDS))
        .collect()
}

fn discovery_instructions(config: &InsightConfig, count: usize) -> String {
    format!(
        "{}\n\nEach numbered line summarizes one conversation. Propose exactly {} \
         mutually distinct categories that together answer the analytical question. \
         Give each a name of two to four words, a summary explaining what the category \
         reveals about the question, and the line numbers of {} to {} representative \
         conversations.",
        config.analysis_context(),
        count,
        MIN_REPRESENTATIVES,
        MAX_REPRESENTATIVES
    )
}

pub async fn discover_categories(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
) -> PipelineResult<CategoryDiscoveryReport> {
    let config_id = config.config_id;
    let rows = features::load_features(&ctx.db, config_id).await?;
    if rows.is_empty() {
        return Err(PipelineError::Precondition(format!(
            "config {} has no feature rows; run feature extraction first",
            config_id
        )));
    }

    let count = params.max_top_level_categories;
    let mut report = CategoryDiscoveryReport {
        feature_count: rows.len(),
        ..Default::default()
    };
    if rows.len() < count {
        report.issues.warn(format!(
            "only {} feature rows for {} requested categories",
            rows.len(),
            count
        ));
    }

    tracing::info!(
        config_id = %config_id,
        feature_count = rows.len(),
        categories = count,
        "Discovering categories"
    );

    let schema = discovery_schema("category_discovery", "categories", count, count, rows.len());
    let request = OracleRequest::new(build_digest(&rows), schema)
        .with_instructions(discovery_instructions(config, count));

    ctx.ensure_not_cancelled()?;
    let groups = request_groups(ctx, params, "discover_categories", "categories", &request).await?;
    for warning in name_warnings(&groups) {
        report.issues.warn(warning);
    }

    let discovered: Vec<Category> = groups
        .into_iter()
        .enumerate()
        .map(|(index, g)| {
            Category::discovered(config_id, index, g.name, g.summary, g.representative_indices)
        })
        .collect();

    categories::replace_categories(&ctx.db, config_id, &discovered).await?;
    ctx.emit_progress(config_id, PHASE_CATEGORY_DISCOVERY, 1, 1, 0);

    report.categories_created = discovered.len();
    report.statistics = discovered.iter().map(TaxonomyStatistic::from).collect();

    tracing::info!(
        config_id = %config_id,
        categories_created = report.categories_created,
        "Category discovery complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn representative_minimum_relaxes_for_small_digests() {
        let schema = discovery_schema("d", "categories", 3, 3, 2);
        let list = &schema.fields[0];
        let FieldKind::ObjectList { item, min_items, max_items } = &list.kind else {
            panic!("expected object list");
        };
        assert_eq!((*min_items, *max_items), (3, Some(3)));
        let indices = item.fields.iter().find(|f| f.name == "representative_indices").unwrap();
        assert_eq!(
            indices.kind,
            FieldKind::IntegerList {
                min: Some(1),
                max: Some(2),
                min_items: 2,
                max_items: Some(10)
            }
        );
    }

    #[test]
    fn schema_rejects_out_of_range_index() {
        let schema = discovery_schema("d", "categories", 1, 1, 3);
        let response = json!({
            "categories": [{
                "name": "Billing",
                "summary": "Charges",
                "representative_indices": [1, 2, 4]
            }]
        });
        assert!(schema.validate(&response).is_err());
    }

    #[test]
    fn normalize_drops_duplicate_indices() {
        let group = normalize_group(DiscoveredGroup {
            name: " Order tracking ".to_string(),
            summary: "s".to_string(),
            representative_indices: vec![3, 1, 3, 2],
        });
        assert_eq!(group.name, "Order tracking");
        assert_eq!(group.representative_indices, vec![3, 1, 2]);
    }

    #[test]
    fn long_names_warn() {
        let groups = vec![DiscoveredGroup {
            name: "A very long category name here".to_string(),
            summary: String::new(),
            representative_indices: vec![],
        }];
        assert_eq!(name_warnings(&groups).len(), 1);
    }
}

//! Feature extraction phase
//!
//! One oracle call per sampled conversation. The output schema is built from
//! the config's extraction schema, so every config gets its own shape.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::conversation_source::fetch_messages;
use super::oracle::{classify_validated, FieldKind, OracleError, OracleRequest, OutputSchema};
use super::{retry_backoff, should_report_progress, PhaseContext, PHASE_FEATURE_EXTRACTION};
use crate::db::{features, samples};
use crate::error::PipelineResult;
use crate::models::{
    build_semantic_string, render_transcript, AttributeKind, ConversationFeature,
    FeatureExtractionReport, InsightConfig, Outcome, TaxonomyParams,
};
use crate::utils::{retry_with_budget, run_bounded};

const SCHEMA_NAME: &str = "conversation_features";

/// Outcome of one work-list item
#[derive(Debug)]
enum ItemOutcome {
    Included,
    Excluded { attribute: String },
    Failed(String),
}

/// Build the per-config output schema
pub fn extraction_output_schema(config: &InsightConfig) -> OutputSchema {
    let mut schema = OutputSchema::new(SCHEMA_NAME).field(
        "primary_intent",
        "What the user was primarily trying to accomplish, in one short sentence",
        FieldKind::bounded_string(300),
    );

    for name in &config.extraction_schema.feature_names {
        schema = schema.field(
            name.clone(),
            format!("Values of '{}' mentioned in the conversation; empty if none", name),
            FieldKind::string_list(),
        );
    }

    schema = schema
        .field(
            "outcome",
            "Whether the user's need appears to have been met",
            FieldKind::enumeration(Outcome::ALL),
        )
        .field(
            "topics",
            "Short topic labels covering the conversation",
            FieldKind::string_list(),
        );

    for attribute in &config.extraction_schema.attributes {
        let kind = match &attribute.kind {
            AttributeKind::String => FieldKind::string(),
            AttributeKind::StringList => FieldKind::string_list(),
            AttributeKind::Enum { values } => FieldKind::enumeration(values.iter().cloned()),
            AttributeKind::Number => FieldKind::Number { min: None, max: None },
            AttributeKind::Boolean => FieldKind::Boolean,
        };
        // Filter attributes must always be decided
        schema = if attribute.filter_by {
            schema.field(attribute.name.clone(), attribute.description.clone(), kind)
        } else {
            schema.optional_field(attribute.name.clone(), attribute.description.clone(), kind)
        };
    }

    schema
}

fn extraction_instructions(config: &InsightConfig) -> String {
    format!(
        "{}\n\nRead the conversation transcript and extract the requested fields. \
         Report only what the conversation shows; use empty lists when a feature \
         is not mentioned.",
        config.analysis_context()
    )
}

/// Turn a validated oracle response into a feature row.
///
/// Returns `Err(attribute)` when a `filter_by` attribute is `false`.
pub fn build_feature(
    config: &InsightConfig,
    conversation_id: &str,
    transcript: String,
    response: &Value,
) -> Result<ConversationFeature, String> {
    let schema = &config.extraction_schema;

    for attribute in schema.filter_attributes() {
        if response.get(&attribute.name) == Some(&Value::Bool(false)) {
            return Err(attribute.name.clone());
        }
    }

    let primary_intent = response["primary_intent"]
        .as_str()
        .unwrap_or_default()
        .trim()
        .to_string();

    let features: BTreeMap<String, Vec<String>> = schema
        .feature_names
        .iter()
        .map(|name| (name.clone(), string_list(&response[name.as_str()])))
        .collect();

    let outcome = response["outcome"]
        .as_str()
        .and_then(|o| o.parse().ok())
        .unwrap_or(Outcome::Unclear);

    let topics = string_list(&response["topics"]);

    let attributes: BTreeMap<String, Value> = schema
        .attributes
        .iter()
        .filter_map(|a| match response.get(&a.name) {
            None | Some(Value::Null) => None,
            Some(value) => Some((a.name.clone(), value.clone())),
        })
        .collect();

    let semantic_string =
        build_semantic_string(schema, &primary_intent, &features, &topics, &attributes);

    Ok(ConversationFeature {
        config_id: config.config_id,
        conversation_id: conversation_id.to_string(),
        primary_intent,
        features,
        outcome,
        topics,
        attributes,
        semantic_string,
        transcript,
        created_at: Utc::now(),
    })
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Conversation ids of the persisted sample, in sample order
pub async fn sampled_conversation_ids(
    ctx: &PhaseContext,
    config: &InsightConfig,
) -> PipelineResult<Vec<String>> {
    Ok(samples::load_sample(&ctx.db, config.config_id)
        .await?
        .into_iter()
        .map(|row| row.conversation_id)
        .collect())
}

async fn extract_one(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
    schema: &OutputSchema,
    instructions: &str,
    conversation_id: &str,
) -> ItemOutcome {
    let messages = match fetch_messages(
        ctx.source.as_ref(),
        conversation_id,
        params.max_messages_per_conversation,
    )
    .await
    {
        Ok(messages) if messages.is_empty() => {
            return ItemOutcome::Failed(format!("conversation {}: no messages", conversation_id))
        }
        Ok(messages) => messages,
        Err(e) => return ItemOutcome::Failed(format!("conversation {}: {}", conversation_id, e)),
    };

    let transcript = render_transcript(&messages);
    let request = OracleRequest::new(transcript.clone(), schema.clone())
        .with_instructions(instructions.to_string());

    let response: Result<Value, OracleError> = retry_with_budget(
        "extract_features",
        params.retry_attempts,
        retry_backoff(params),
        |_| classify_validated(ctx.oracle.as_ref(), &request),
    )
    .await;

    let response = match response {
        Ok(value) => value,
        Err(e) => return ItemOutcome::Failed(format!("conversation {}: {}", conversation_id, e)),
    };

    let feature = match build_feature(config, conversation_id, transcript, &response) {
        Ok(feature) => feature,
        Err(attribute) => return ItemOutcome::Excluded { attribute },
    };

    match features::upsert_feature(&ctx.db, &feature).await {
        Ok(()) => ItemOutcome::Included,
        Err(e) => ItemOutcome::Failed(format!(
            "conversation {}: failed to persist features: {}",
            conversation_id, e
        )),
    }
}

/// Extract features for every conversation in `work_list`.
///
/// Duplicate ids are processed once. Conversations that already have a
/// feature row are skipped.
pub async fn extract_features(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
    work_list: &[String],
) -> PipelineResult<FeatureExtractionReport> {
    let config_id = config.config_id;
    let existing = features::existing_feature_ids(&ctx.db, config_id).await?;

    let mut seen = HashSet::new();
    let unique: Vec<&String> = work_list.iter().filter(|id| seen.insert(*id)).collect();
    let pending: Vec<&String> = unique
        .iter()
        .copied()
        .filter(|id| !existing.contains(*id))
        .collect();
    let mut report = FeatureExtractionReport {
        skipped_existing: unique.len() - pending.len(),
        ..Default::default()
    };

    tracing::info!(
        config_id = %config_id,
        pending = pending.len(),
        skipped_existing = report.skipped_existing,
        concurrency = params.concurrency,
        "Extracting conversation features"
    );

    if work_list.is_empty() {
        report.issues.warn("work list is empty; nothing to extract");
        return Ok(report);
    }

    let schema = extraction_output_schema(config);
    let instructions = extraction_instructions(config);
    let total = pending.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let outcomes = run_bounded(pending, params.concurrency, &ctx.cancel, |conversation_id| {
        let schema = &schema;
        let instructions = &instructions;
        let completed = Arc::clone(&completed);
        let failed = Arc::clone(&failed);
        async move {
            let outcome =
                extract_one(ctx, config, params, schema, instructions, conversation_id).await;

            if matches!(outcome, ItemOutcome::Failed(_)) {
                failed.fetch_add(1, Ordering::SeqCst);
            }
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if should_report_progress(done, total) {
                ctx.emit_progress(
                    config_id,
                    PHASE_FEATURE_EXTRACTION,
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
            ItemOutcome::Included => report.included += 1,
            ItemOutcome::Excluded { attribute } => {
                tracing::debug!(config_id = %config_id, attribute = %attribute, "Conversation excluded");
                report.excluded += 1;
            }
            ItemOutcome::Failed(message) => {
                tracing::warn!(config_id = %config_id, error = %message, "Feature extraction failed");
                report.failed += 1;
                report.issues.error(message);
            }
        }
    }

    tracing::info!(
        config_id = %config_id,
        processed = report.processed,
        included = report.included,
        excluded = report.excluded,
        failed = report.failed,
        "Feature extraction complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttributeSpec, ExtractionSchema, NewInsightConfig};
    use serde_json::json;

    fn config() -> InsightConfig {
        InsightConfig::create(NewInsightConfig {
            question: "What do shoppers ask about?".to_string(),
            agent_description: "Storefront assistant".to_string(),
            domain_context: None,
            categorization_guidance: None,
            extraction_schema: ExtractionSchema {
                feature_names: vec!["products".to_string()],
                attributes: vec![
                    AttributeSpec {
                        name: "is_shopper".to_string(),
                        description: "Real shopper, not a test".to_string(),
                        kind: AttributeKind::Boolean,
                        filter_by: true,
                    },
                    AttributeSpec {
                        name: "channel".to_string(),
                        description: String::new(),
                        kind: AttributeKind::Enum {
                            values: vec!["web".to_string(), "app".to_string()],
                        },
                        filter_by: false,
                    },
                ],
            },
            clustering_focus: String::new(),
            params: TaxonomyParams::default(),
        })
        .unwrap()
    }

    #[test]
    fn schema_follows_config_fields() {
        let schema = extraction_output_schema(&config());
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["primary_intent", "products", "outcome", "topics", "is_shopper", "channel"]
        );
        let channel = schema.fields.iter().find(|f| f.name == "channel").unwrap();
        assert!(!channel.required);
        let filter = schema.fields.iter().find(|f| f.name == "is_shopper").unwrap();
        assert!(filter.required);
    }

    #[test]
    fn false_filter_attribute_excludes() {
        let response = json!({
            "primary_intent": "test the bot",
            "products": [],
            "outcome": "unclear",
            "topics": [],
            "is_shopper": false,
            "channel": null
        });
        let excluded = build_feature(&config(), "c1", String::new(), &response).unwrap_err();
        assert_eq!(excluded, "is_shopper");
    }

    #[test]
    fn builds_feature_with_semantic_string() {
        let response = json!({
            "primary_intent": "find running shoes",
            "products": ["trail shoes", " "],
            "outcome": "satisfied",
            "topics": ["footwear"],
            "is_shopper": true,
            "channel": "app"
        });
        let feature =
            build_feature(&config(), "c1", "user: hi".to_string(), &response).unwrap();
        assert_eq!(feature.outcome, Outcome::Satisfied);
        assert_eq!(feature.features["products"], vec!["trail shoes".to_string()]);
        assert_eq!(
            feature.semantic_string,
            "Intent: find running shoes | Products: trail shoes | Topics: footwear | Is shopper: true | Channel: app"
        );
    }
}

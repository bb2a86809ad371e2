//! Test Helper Utilities
//!
//! Shared fixtures for insight-taxonomy integration tests

#![allow(dead_code)]

pub mod memory_source;
pub mod scripted_oracle;

pub use memory_source::MemorySource;
pub use scripted_oracle::ScriptedOracle;

use chrono::{DateTime, TimeZone, Utc};
use insight_common::events::EventBus;
use std::sync::Arc;

use insight_taxonomy::db::configs;
use insight_taxonomy::models::{
    AttributeKind, AttributeSpec, ExtractionSchema, InsightConfig, NewInsightConfig,
    TaxonomyParams,
};
use insight_taxonomy::services::PhaseContext;

pub const CATEGORY_NAMES: [&str; 3] = ["Billing Questions", "Shipping Delays", "Account Access"];
pub const SUBCATEGORY_NAMES: [&str; 2] = ["Refund Requests", "Invoice Errors"];

/// Fixed reference time so listings sort the same on every run
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
}

/// Eighteen conversations, six per topic, with mixed lengths
pub fn support_source() -> MemorySource {
    let now = reference_time();
    MemorySource::new()
        .with_topic("billing", "billing refund", 6, 3, now)
        .with_topic("shipping", "shipping", 6, 8, now - chrono::Duration::minutes(10))
        .with_topic("account", "account", 6, 1, now - chrono::Duration::minutes(20))
}

/// Parameters sized for the fixtures: every conversation is sampled and
/// retries do not sleep.
pub fn test_params() -> TaxonomyParams {
    TaxonomyParams {
        max_top_level_categories: 3,
        max_subcategories_per_category: 2,
        min_category_size: 3,
        sample_size: 50,
        max_messages_per_conversation: 20,
        oversample_multiplier: 2,
        concurrency: 4,
        retry_attempts: 2,
        retry_backoff_ms: 0,
        ..Default::default()
    }
}

pub fn new_config(params: TaxonomyParams) -> NewInsightConfig {
    NewInsightConfig {
        question: "Why do customers contact support?".to_string(),
        agent_description: "Customer support assistant for an online store".to_string(),
        domain_context: Some("E-commerce".to_string()),
        categorization_guidance: None,
        extraction_schema: ExtractionSchema {
            feature_names: vec!["products".to_string()],
            attributes: vec![AttributeSpec {
                name: "in_scope".to_string(),
                description: "Whether the conversation is a genuine support request".to_string(),
                kind: AttributeKind::Boolean,
                filter_by: true,
            }],
        },
        clustering_focus: "reason for contact".to_string(),
        params,
    }
}

pub struct TestEnv {
    pub ctx: PhaseContext,
    pub source: Arc<MemorySource>,
    pub oracle: Arc<ScriptedOracle>,
    pub config: InsightConfig,
}

/// In-memory database, a persisted config, and the given collaborators
pub async fn setup(source: MemorySource, oracle: ScriptedOracle, params: TaxonomyParams) -> TestEnv {
    let db = insight_common::db::init_memory_database()
        .await
        .expect("Failed to create in-memory database");

    let config = InsightConfig::create(new_config(params)).expect("valid config");
    configs::save_config(&db, &config)
        .await
        .expect("Failed to save config");

    let source = Arc::new(source);
    let oracle = Arc::new(oracle);
    let ctx = PhaseContext::new(
        db,
        oracle.clone(),
        source.clone(),
        EventBus::new(256),
    );

    TestEnv {
        ctx,
        source,
        oracle,
        config,
    }
}

pub fn default_oracle() -> ScriptedOracle {
    ScriptedOracle::new(&CATEGORY_NAMES, &SUBCATEGORY_NAMES)
}

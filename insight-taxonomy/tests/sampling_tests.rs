//! Integration tests for the sampling phase
//!
//! Covers both sampling modes against an in-memory conversation source and
//! the reuse of a persisted sample.

mod helpers;

use chrono::Duration;
use std::collections::HashSet;
use std::sync::atomic::Ordering;

use helpers::{default_oracle, reference_time, setup, support_source, test_params, MemorySource};
use insight_taxonomy::db::samples;
use insight_taxonomy::models::{SamplingMode, TaxonomyParams};
use insight_taxonomy::services::run_sampling;

#[tokio::test]
async fn stratified_sampling_persists_every_conversation_when_target_exceeds_supply() {
    let env = setup(support_source(), default_oracle(), test_params()).await;

    let report = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();

    assert_eq!(report.mode, "stratified");
    assert_eq!(report.total_included, 18);
    assert!(!report.reused_existing);

    let rows = samples::load_sample(&env.ctx.db, env.config.config_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 18);

    let unique: HashSet<_> = rows.iter().map(|r| r.conversation_id.as_str()).collect();
    assert_eq!(unique.len(), rows.len(), "sample must not contain duplicates");
    assert!(rows.iter().all(|r| r.bucket.is_some()));

    // Bucket counts follow message counts: 1 -> single_turn, 3 -> short, 8 -> medium
    let by_bucket = |name: &str| rows.iter().filter(|r| r.bucket.as_deref() == Some(name)).count();
    assert_eq!(by_bucket("single_turn"), 6);
    assert_eq!(by_bucket("short"), 6);
    assert_eq!(by_bucket("medium"), 6);
}

#[tokio::test]
async fn stratified_sampling_respects_target_and_over_represents_long_conversations() {
    let now = reference_time();
    let source = MemorySource::new()
        .with_topic("single", "billing", 20, 1, now)
        .with_topic("long", "shipping", 20, 12, now - Duration::days(1));
    let params = TaxonomyParams {
        sample_size: 10,
        oversample_multiplier: 4,
        ..test_params()
    };
    let env = setup(source, default_oracle(), params).await;

    let report = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();
    assert_eq!(report.total_included, 10);

    let long = report.buckets.iter().find(|b| b.bucket == "long").unwrap();
    let single = report.buckets.iter().find(|b| b.bucket == "single_turn").unwrap();
    assert_eq!((long.available, single.available), (20, 20));
    assert!(long.sampled > single.sampled);
    assert_eq!(long.sampled + single.sampled, 10);
}

#[tokio::test]
async fn empty_and_unreachable_conversations_are_skipped() {
    let now = reference_time();
    let source = support_source()
        .with_conversation("empty-1", now - Duration::minutes(5), &[])
        .failing("billing-2");
    let params = TaxonomyParams {
        only_with_messages: false,
        ..test_params()
    };
    let env = setup(source, default_oracle(), params).await;

    let report = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();

    assert_eq!(report.total_fetched, 19);
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(report.skipped_failed, 1);
    assert_eq!(report.total_included, 17);
    assert_eq!(report.issues.errors.len(), 1);
    assert!(report.issues.errors[0].contains("billing-2"));
}

#[tokio::test]
async fn persisted_sample_is_reused_without_touching_the_source() {
    let env = setup(support_source(), default_oracle(), test_params()).await;

    let first = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();
    let list_calls = env.source.list_calls.load(Ordering::SeqCst);
    let before = samples::load_sample(&env.ctx.db, env.config.config_id)
        .await
        .unwrap();

    let second = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();
    let after = samples::load_sample(&env.ctx.db, env.config.config_id)
        .await
        .unwrap();

    assert!(second.reused_existing);
    assert_eq!(second.total_included, first.total_included);
    assert_eq!(before, after);
    assert_eq!(env.source.list_calls.load(Ordering::SeqCst), list_calls);
}

#[tokio::test]
async fn date_range_sampling_keeps_only_conversations_inside_the_window() {
    let now = reference_time();
    // billing-0..5 are updated hourly from `now` backwards
    let params = TaxonomyParams {
        sampling: SamplingMode::DateRange {
            start: now - Duration::hours(2),
            end: now,
        },
        ..test_params()
    };
    let source = MemorySource::new()
        .with_topic("billing", "billing", 6, 2, now)
        .with_conversation("future", now + Duration::hours(1), &["hello"]);
    let env = setup(source, default_oracle(), params).await;

    let report = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();
    assert_eq!(report.mode, "date_range");
    assert_eq!(report.total_included, 3);

    let rows = samples::load_sample(&env.ctx.db, env.config.config_id)
        .await
        .unwrap();
    let ids: HashSet<_> = rows.iter().map(|r| r.conversation_id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["billing-0", "billing-1", "billing-2"]));
    assert!(rows.iter().all(|r| r.bucket.is_none()));
}

#[tokio::test]
async fn sampling_an_empty_source_warns_and_persists_nothing() {
    let env = setup(MemorySource::new(), default_oracle(), test_params()).await;

    let report = run_sampling(&env.ctx, &env.config, &env.config.params)
        .await
        .unwrap();

    assert_eq!(report.total_included, 0);
    assert_eq!(report.issues.warnings.len(), 1);
    assert!(samples::load_sample(&env.ctx.db, env.config.config_id)
        .await
        .unwrap()
        .is_empty());
}

//! Sampling phase
//!
//! Chooses the conversations every later phase works on and persists the
//! selection. A config that already has a persisted sample reuses it.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::conversation_source::fetch_messages;
use super::date_range_sampler::sample_date_range;
use super::stratified_sampler::{stratified_sample, LengthBucket};
use super::{PhaseContext, PHASE_SAMPLING};
use crate::db::samples::{self, SampleRow};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    ConversationFilters, ConversationSummary, InsightConfig, SampleReport, SampledConversation,
    SamplingMode, TaxonomyParams,
};
use crate::services::conversation_source::list_conversations_up_to;
use crate::utils::{cancellable, run_bounded};

/// Upper bound on conversations listed for stratification
pub const MAX_STRATIFIED_FETCH: usize = 1000;

/// Concurrent message fetches; the source limiter caps the actual rate
const FETCH_CONCURRENCY: usize = 16;

/// Conversations with their messages, plus what was skipped
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// In listing order
    pub conversations: Vec<SampledConversation>,
    pub skipped_empty: usize,
    pub skipped_failed: usize,
    pub failures: Vec<String>,
}

/// Fetch up to `cap` messages for each summary.
///
/// A failed fetch skips that conversation; empty conversations are dropped.
pub async fn fetch_with_messages(
    ctx: &PhaseContext,
    summaries: Vec<ConversationSummary>,
    cap: usize,
) -> FetchOutcome {
    let source = ctx.source.clone();

    let mut results = run_bounded(
        summaries.into_iter().enumerate(),
        FETCH_CONCURRENCY,
        &ctx.cancel,
        |(position, summary)| {
            let source = source.clone();
            async move {
                let fetched = fetch_messages(source.as_ref(), &summary.id, cap).await;
                (position, summary, fetched)
            }
        },
    )
    .await;
    results.sort_by_key(|(position, _, _)| *position);

    let mut outcome = FetchOutcome::default();
    for (_, summary, fetched) in results {
        match fetched {
            Ok(messages) if messages.is_empty() => outcome.skipped_empty += 1,
            Ok(messages) => outcome.conversations.push(SampledConversation {
                conversation: summary,
                messages,
            }),
            Err(e) => {
                tracing::warn!(
                    conversation_id = %summary.id,
                    error = %e,
                    "Message fetch failed, skipping conversation"
                );
                outcome.skipped_failed += 1;
                outcome
                    .failures
                    .push(format!("conversation {}: {}", summary.id, e));
            }
        }
    }
    outcome
}

/// Stratified selection over the most recent conversations
pub async fn sample_stratified(
    ctx: &PhaseContext,
    params: &TaxonomyParams,
) -> PipelineResult<(Vec<(Option<LengthBucket>, SampledConversation)>, SampleReport)> {
    let target = params.sample_size;
    let fetch_limit = target
        .saturating_mul(params.oversample_multiplier)
        .min(MAX_STRATIFIED_FETCH);
    let filters = ConversationFilters {
        has_messages: params.only_with_messages.then_some(true),
        ..Default::default()
    };

    let summaries = cancellable(
        &ctx.cancel,
        list_conversations_up_to(ctx.source.as_ref(), &filters, Some(fetch_limit)),
    )
    .await
    .ok_or(PipelineError::Cancelled)??;
    let total_fetched = summaries.len();
    ctx.ensure_not_cancelled()?;

    let fetched =
        fetch_with_messages(ctx, summaries, params.max_messages_per_conversation).await;
    ctx.ensure_not_cancelled()?;

    let sample = {
        let mut rng = StdRng::from_entropy();
        stratified_sample(
            fetched.conversations,
            target,
            SampledConversation::message_count,
            &mut rng,
        )
    };

    let mut report = SampleReport {
        mode: "stratified".to_string(),
        total_fetched,
        skipped_empty: fetched.skipped_empty,
        skipped_failed: fetched.skipped_failed,
        total_included: sample.items.len(),
        buckets: sample.buckets,
        ..Default::default()
    };
    report.issues.errors.extend(fetched.failures);

    let items = sample
        .items
        .into_iter()
        .map(|(bucket, conversation)| (Some(bucket), conversation))
        .collect();
    Ok((items, report))
}

/// Run the sampling phase for a config
pub async fn run_sampling(
    ctx: &PhaseContext,
    config: &InsightConfig,
    params: &TaxonomyParams,
) -> PipelineResult<SampleReport> {
    let config_id = config.config_id;

    let existing = samples::load_sample(&ctx.db, config_id).await?;
    if !existing.is_empty() {
        tracing::info!(
            config_id = %config_id,
            sampled = existing.len(),
            "Reusing persisted sample"
        );
        return Ok(SampleReport {
            mode: match params.sampling {
                SamplingMode::Stratified => "stratified".to_string(),
                SamplingMode::DateRange { .. } => "date_range".to_string(),
            },
            total_included: existing.len(),
            reused_existing: true,
            ..Default::default()
        });
    }

    tracing::info!(
        config_id = %config_id,
        sample_size = params.sample_size,
        mode = ?params.sampling,
        "Sampling conversations"
    );

    let (selected, mut report) = match &params.sampling {
        SamplingMode::Stratified => sample_stratified(ctx, params).await?,
        SamplingMode::DateRange { start, end } => {
            let (conversations, report) = sample_date_range(ctx, *start, *end, params).await?;
            let items = conversations.into_iter().map(|c| (None, c)).collect();
            (items, report)
        }
    };

    if selected.is_empty() {
        report
            .issues
            .warn("no conversations with messages were available to sample");
    }

    let rows: Vec<SampleRow> = selected
        .iter()
        .enumerate()
        .map(|(ordinal, (bucket, conversation))| SampleRow {
            conversation_id: conversation.id().to_string(),
            ordinal,
            message_count: conversation.message_count(),
            bucket: bucket.map(|b| b.as_str().to_string()),
        })
        .collect();
    samples::replace_sample(&ctx.db, config_id, &rows).await?;

    ctx.emit_progress(config_id, PHASE_SAMPLING, rows.len(), rows.len(), report.skipped_failed);
    tracing::info!(
        config_id = %config_id,
        total_fetched = report.total_fetched,
        included = report.total_included,
        skipped_empty = report.skipped_empty,
        skipped_failed = report.skipped_failed,
        "Sampling complete"
    );

    Ok(report)
}

//! Exhaustive sampling of a time window
//!
//! Every conversation updated within `[start, end]` that has messages is
//! included. No weighting or selection.

use chrono::{DateTime, Utc};

use super::conversation_source::list_conversations_up_to;
use super::sampling::fetch_with_messages;
use super::PhaseContext;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ConversationFilters, SampleReport, SampledConversation, TaxonomyParams};
use crate::utils::cancellable;

/// Inclusive on both ends
pub fn in_range(updated_at: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    updated_at >= start && updated_at <= end
}

pub async fn sample_date_range(
    ctx: &PhaseContext,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    params: &TaxonomyParams,
) -> PipelineResult<(Vec<SampledConversation>, SampleReport)> {
    let filters = ConversationFilters {
        after: Some(start),
        before: Some(end),
        has_messages: params.only_with_messages.then_some(true),
    };

    let listed = cancellable(
        &ctx.cancel,
        list_conversations_up_to(ctx.source.as_ref(), &filters, None),
    )
    .await
    .ok_or(PipelineError::Cancelled)??;
    // The server-side filter is advisory; enforce the window here too
    let summaries: Vec<_> = listed
        .into_iter()
        .filter(|c| in_range(c.updated_at, start, end))
        .collect();
    let total_fetched = summaries.len();
    ctx.ensure_not_cancelled()?;

    tracing::info!(
        start = %start,
        end = %end,
        total_fetched,
        "Fetched conversations in date range"
    );

    let fetched =
        fetch_with_messages(ctx, summaries, params.max_messages_per_conversation).await;
    ctx.ensure_not_cancelled()?;

    let mut report = SampleReport {
        mode: "date_range".to_string(),
        total_fetched,
        skipped_empty: fetched.skipped_empty,
        skipped_failed: fetched.skipped_failed,
        total_included: fetched.conversations.len(),
        ..Default::default()
    };
    report.issues.errors.extend(fetched.failures);

    Ok((fetched.conversations, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn range_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap();
        assert!(in_range(start, start, end));
        assert!(in_range(end, start, end));
        assert!(!in_range(end + chrono::Duration::seconds(1), start, end));
        assert!(!in_range(start - chrono::Duration::seconds(1), start, end));
    }
}

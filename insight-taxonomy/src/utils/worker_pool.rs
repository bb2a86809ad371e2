//! Bounded-concurrency worker pool with cancellation
//!
//! Every item runs `classify → validate → persist` inside its own future and
//! returns its outcome. The returned `Vec` is the barrier: callers fold
//! outcomes into aggregate counts only after every item has resolved.

use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `work` over `items` with at most `concurrency` futures in flight.
///
/// Items not yet started when `cancel` fires are skipped, and in-flight items
/// are abandoned at their next await point. Only completed outcomes are
/// returned, in completion order.
pub async fn run_bounded<I, T, F, Fut>(
    items: I,
    concurrency: usize,
    cancel: &CancellationToken,
    mut work: F,
) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    let cancel = cancel.clone();

    stream::iter(items)
        .map(move |item| {
            let cancel = cancel.clone();
            let task = work(item);
            async move {
                if cancel.is_cancelled() {
                    return None;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = task => Some(outcome),
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|outcome| async move { outcome })
        .collect()
        .await
}

/// Await `future` unless `cancel` fires first
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = future => Some(value),
    }
}

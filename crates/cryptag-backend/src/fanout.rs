//! Bounded concurrent fan-out
//!
//! Tag creation and per-file reads launch one unit of work per item. Running
//! them all at once would open an unbounded number of files or requests, so
//! every fan-out goes through [`fan_out`] with an explicit limit.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Default number of units in flight at once
pub const DEFAULT_FAN_OUT: usize = 16;

/// Run `f` over every item with at most `limit` futures in flight.
///
/// Every result is collected; order is not preserved. A `limit` of 0 is
/// treated as 1.
pub async fn fan_out<I, T, F, Fut>(items: I, limit: usize, f: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(f)
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_collects_every_result() {
        let mut out = fan_out(0..50u32, 8, |i| async move { i * 2 }).await;
        out.sort_unstable();
        assert_eq!(out, (0..50u32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_respects_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        fan_out(0..40, 4, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency {} exceeded limit", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_zero_limit_still_runs() {
        let out = fan_out(vec![1, 2, 3], 0, |i| async move { i }).await;
        assert_eq!(out.len(), 3);
    }
}

//! Rate-limited batch execution
//!
//! Generic concurrency-bounded, delay-spaced executor. Items within a batch
//! run concurrently; the whole batch is awaited, then the processor sleeps
//! the configured delay before starting the next batch (no trailing sleep
//! after the last). Per-item outcomes are captured independently so one bad
//! item never fails the run.

use std::future::Future;
use std::time::Duration;

use calbridge_domain::Result;
use futures::future::join_all;
use tracing::debug;

/// Outcome of one work item, tagged with its position in the input sequence
#[derive(Debug)]
pub struct ItemOutcome<R> {
    pub index: usize,
    pub result: Result<R>,
}

/// Concurrency-bounded, delay-spaced executor.
///
/// Used for multi-user renewal sweeps (item = user) and for the operations
/// of a single sync run (item = reconcile operation), in both cases to keep
/// concurrent provider calls under the rate limit.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    batch_size: usize,
    batch_delay: Duration,
}

impl BatchProcessor {
    pub fn new(batch_size: usize, batch_delay: Duration) -> Self {
        Self { batch_size: batch_size.max(1), batch_delay }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run `worker` over `items` in rate-limited batches.
    ///
    /// Outcomes come back in input order. The processor itself never fails;
    /// per-item errors are carried in the outcomes.
    pub async fn process<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<ItemOutcome<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let total = items.len();
        let mut outcomes = Vec::with_capacity(total);
        let last_batch = total.saturating_sub(1) / self.batch_size;

        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(self.batch_size);
        for item in items {
            current.push(item);
            if current.len() == self.batch_size {
                batches.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }

        for (batch_no, batch) in batches.into_iter().enumerate() {
            debug!(batch_no, size = batch.len(), "starting batch");

            let base_index = outcomes.len();
            let futures = batch.into_iter().enumerate().map(|(offset, item)| {
                let fut = worker(item);
                async move { (base_index + offset, fut.await) }
            });

            for (index, result) in join_all(futures).await {
                outcomes.push(ItemOutcome { index, result });
            }

            if batch_no < last_batch && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use calbridge_domain::SyncError;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test]
    async fn captures_per_item_outcomes_in_order() {
        let processor = BatchProcessor::new(2, Duration::from_millis(0));
        let outcomes = processor
            .process(vec![1, 2, 3, 4, 5], |n| async move {
                if n == 4 {
                    Err(SyncError::Validation(format!("item {n} rejected")))
                } else {
                    Ok(n * 10)
                }
            })
            .await;

        assert_eq!(outcomes.len(), 5);
        let failed: Vec<usize> =
            outcomes.iter().filter(|o| o.result.is_err()).map(|o| o.index).collect();
        assert_eq!(failed, vec![3]);
        assert!(matches!(outcomes[0].result, Ok(10)));
        assert!(matches!(outcomes[4].result, Ok(50)));
    }

    #[tokio::test]
    async fn bounds_concurrency_to_batch_size() {
        let processor = BatchProcessor::new(3, Duration::from_millis(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outcomes = processor
            .process((0..10).collect(), |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(outcomes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_batches_by_configured_delay() {
        let processor = BatchProcessor::new(3, Duration::from_secs(1));
        let start = Instant::now();

        let outcomes = processor.process((0..10).collect(), |_| async { Ok(()) }).await;

        // 4 batches, 3 inter-batch delays, no trailing sleep
        assert_eq!(outcomes.len(), 10);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn single_batch_has_no_delay() {
        let processor = BatchProcessor::new(10, Duration::from_secs(60));
        let start = Instant::now();

        let outcomes = processor.process(vec![1, 2, 3], |_| async { Ok(()) }).await;

        assert_eq!(outcomes.len(), 3);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_batch_size_is_clamped_to_one() {
        let processor = BatchProcessor::new(0, Duration::from_millis(0));
        let outcomes = processor.process(vec![1, 2], |n| async move { Ok(n) }).await;
        assert_eq!(outcomes.len(), 2);
    }
}

//! Staged rollout controller
//!
//! Built fresh for every publish and driven by a single task. `arrange`
//! partitions the targets once; `next_batch` hands the batches out in order,
//! sleeping for the previous batch's delay before every batch but the first.
//!
//! Partitioning is a pure function of the target order and the parameters,
//! so a given target list always rolls out the same way.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::RolloutConfig;
use crate::sessions::AgentSession;

/// One batch of targets and the wait imposed after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutBatch<T = AgentSession> {
    pub targets: Vec<T>,
    /// Wait after this batch is consumed, before the next is handed out
    pub post_delay: Duration,
}

/// Split `targets` into consecutive chunks of
/// `max(ceil(len / step_count), min_batch_size)`, in input order
pub fn partition<T>(targets: Vec<T>, step_count: usize, min_batch_size: usize) -> Vec<Vec<T>> {
    if targets.is_empty() {
        return Vec::new();
    }

    let step_count = step_count.max(1);
    let batch_size = targets
        .len()
        .div_ceil(step_count)
        .max(min_batch_size)
        .max(1);

    let mut batches = Vec::with_capacity(targets.len().div_ceil(batch_size));
    let mut rest = targets.into_iter().peekable();
    while rest.peek().is_some() {
        batches.push(rest.by_ref().take(batch_size).collect());
    }
    batches
}

/// Single-consumer iterator over the batches of one rollout
#[derive(Debug)]
pub struct RolloutController<T = AgentSession> {
    step_count: usize,
    min_batch_size: usize,
    inter_batch_delay: Duration,
    batches: VecDeque<RolloutBatch<T>>,
    /// Delay owed by the batch handed out last
    pending_delay: Option<Duration>,
}

impl<T> RolloutController<T> {
    /// Create a controller; a zero `step_count` is treated as 1
    pub fn new(step_count: usize, min_batch_size: usize, inter_batch_delay: Duration) -> Self {
        Self {
            step_count: step_count.max(1),
            min_batch_size,
            inter_batch_delay,
            batches: VecDeque::new(),
            pending_delay: None,
        }
    }

    pub fn from_config(config: &RolloutConfig) -> Self {
        Self::new(
            config.step_count,
            config.min_batch_size,
            config.inter_batch_delay,
        )
    }

    /// Partition `targets` into batches.
    ///
    /// A second call appends another partition after the first; use one
    /// controller per rollout.
    pub fn arrange(&mut self, targets: Vec<T>) {
        let total = targets.len();
        let chunks = partition(targets, self.step_count, self.min_batch_size);
        let count = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let post_delay = if i + 1 < count {
                self.inter_batch_delay
            } else {
                Duration::ZERO
            };
            self.batches.push_back(RolloutBatch {
                targets: chunk,
                post_delay,
            });
        }

        debug!(
            targets = total,
            batches = count,
            step_count = self.step_count,
            min_batch_size = self.min_batch_size,
            "Rollout arranged"
        );
    }

    /// Next batch, or `None` once every batch has been handed out.
    ///
    /// The first batch returns immediately; each later call first waits out
    /// the previous batch's `post_delay`. Safe to call again after `None`.
    pub async fn next_batch(&mut self) -> Option<Vec<T>> {
        let batch = self.batches.pop_front()?;

        if let Some(delay) = self.pending_delay.take() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        self.pending_delay = Some(batch.post_delay);
        Some(batch.targets)
    }

    /// Batches not yet handed out
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }

    /// Upcoming batches with their delays
    pub fn pending(&self) -> impl Iterator<Item = &RolloutBatch<T>> {
        self.batches.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn drain_sizes(batches: &[Vec<u32>]) -> Vec<usize> {
        batches.iter().map(Vec::len).collect()
    }

    #[test]
    fn test_partition_sizes() {
        let targets: Vec<u32> = (0..10).collect();
        assert_eq!(drain_sizes(&partition(targets.clone(), 3, 1)), vec![4, 4, 2]);
        assert_eq!(drain_sizes(&partition(targets.clone(), 1, 1)), vec![10]);
        assert_eq!(drain_sizes(&partition(targets.clone(), 10, 1)), vec![1; 10]);
        // min_batch_size dominates when step_count is large
        assert_eq!(drain_sizes(&partition(targets.clone(), 10, 4)), vec![4, 4, 2]);
        // Fewer targets than the floor yields a single batch
        assert_eq!(drain_sizes(&partition(targets, 5, 20)), vec![10]);
        assert!(partition(Vec::<u32>::new(), 3, 1).is_empty());
    }

    #[test]
    fn test_partition_preserves_order_and_membership() {
        for len in 1..40u32 {
            for steps in 1..8 {
                for min in 0..6 {
                    let targets: Vec<u32> = (0..len).collect();
                    let flat: Vec<u32> =
                        partition(targets.clone(), steps, min).into_iter().flatten().collect();
                    assert_eq!(flat, targets, "len={} steps={} min={}", len, steps, min);
                }
            }
        }
    }

    #[test]
    fn test_arrange_sets_post_delays() {
        let mut controller = RolloutController::new(3, 1, Duration::from_millis(200));
        controller.arrange((0..9u32).collect());

        let delays: Vec<Duration> = controller.pending().map(|b| b.post_delay).collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(200), Duration::from_millis(200), Duration::ZERO]
        );
    }

    #[test]
    fn test_arrange_empty_is_noop() {
        let mut controller = RolloutController::<u32>::new(3, 1, Duration::from_secs(1));
        controller.arrange(Vec::new());
        assert_eq!(controller.remaining(), 0);
    }

    #[test]
    fn test_single_step_has_no_delay() {
        let mut controller = RolloutController::new(1, 1, Duration::from_secs(9));
        controller.arrange((0..5u32).collect());
        let batches: Vec<&RolloutBatch<u32>> = controller.pending().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].post_delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_batch_is_immediate() {
        let mut controller = RolloutController::new(2, 1, Duration::from_secs(30));
        controller.arrange(vec![1u32, 2]);

        let start = Instant::now();
        assert_eq!(controller.next_batch().await, Some(vec![1]));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_enforced_between_batches() {
        let mut controller = RolloutController::new(2, 1, Duration::from_millis(200));
        controller.arrange(vec![1u32, 2]);

        assert_eq!(controller.next_batch().await, Some(vec![1]));
        let first_returned = Instant::now();
        assert_eq!(controller.next_batch().await, Some(vec![2]));
        assert!(first_returned.elapsed() >= Duration::from_millis(200));

        // Exhausted: no further waiting, repeatable
        let exhausted = Instant::now();
        assert_eq!(controller.next_batch().await, None);
        assert_eq!(controller.next_batch().await, None);
        assert_eq!(exhausted.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_delay_enforced_real_clock() {
        let mut controller = RolloutController::new(2, 1, Duration::from_millis(200));
        controller.arrange(vec!["a", "b"]);

        controller.next_batch().await.unwrap();
        let first_returned = std::time::Instant::now();
        controller.next_batch().await.unwrap();
        assert!(first_returned.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_concatenate_to_targets() {
        let targets: Vec<u32> = (0..23).collect();
        let mut controller = RolloutController::new(4, 2, Duration::from_millis(10));
        controller.arrange(targets.clone());

        let mut seen = Vec::new();
        while let Some(batch) = controller.next_batch().await {
            assert!(!batch.is_empty());
            seen.extend(batch);
        }
        assert_eq!(seen, targets);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_arrange_appends() {
        let mut controller = RolloutController::new(1, 1, Duration::from_millis(10));
        controller.arrange(vec![1u32, 2]);
        controller.arrange(vec![3u32]);
        assert_eq!(controller.remaining(), 2);

        assert_eq!(controller.next_batch().await, Some(vec![1, 2]));
        assert_eq!(controller.next_batch().await, Some(vec![3]));
        assert_eq!(controller.next_batch().await, None);
    }
}

//! Replica scheduler
//!
//! Holds the directory of known front-door replicas behind a single
//! reader/writer lock: membership updates take the write side, schedule and
//! snapshot requests share the read side.
//!
//! ## Ordering
//!
//! `schedule` sorts replicas by load, splits them at the midpoint and
//! shuffles each half independently. Low-load replicas always come first,
//! but agents connecting at the same moment do not all land on the single
//! least-loaded replica.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::feed::{DirectoryChange, MembershipEvent};
use super::{Candidate, ReplicaInfo};
use crate::types::{GatewayError, Result};

/// Outcome of one `apply_update` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Events that changed (or confirmed) directory state
    pub applied: usize,
    /// Malformed events that were logged and dropped
    pub skipped: usize,
}

/// Load-aware scheduler over the replica directory
pub struct ReplicaScheduler {
    /// `address:port` -> replica
    replicas: RwLock<HashMap<String, ReplicaInfo>>,
    /// Maximum candidates handed to one agent (0 = unlimited)
    max_candidates: usize,
}

impl ReplicaScheduler {
    /// Create an empty scheduler
    pub fn new(max_candidates: usize) -> Self {
        Self {
            replicas: RwLock::new(HashMap::new()),
            max_candidates,
        }
    }

    /// Apply membership events in order.
    ///
    /// Malformed records are skipped so one bad entry cannot stall the feed.
    pub async fn apply_update(&self, events: Vec<MembershipEvent>) -> ApplySummary {
        let mut summary = ApplySummary::default();
        let mut replicas = self.replicas.write().await;

        for event in events {
            match event.decode() {
                Ok(DirectoryChange::Upsert(replica)) => {
                    let key = replica.key();
                    debug!(
                        replica = %key,
                        load = replica.active_session_count,
                        "Replica put"
                    );
                    if replicas.insert(key.clone(), replica).is_none() {
                        info!(replica = %key, "Replica joined directory");
                    }
                    summary.applied += 1;
                }
                Ok(DirectoryChange::Remove(key)) => {
                    if replicas.remove(&key).is_some() {
                        info!(replica = %key, "Replica left directory");
                    }
                    summary.applied += 1;
                }
                Err(e) => {
                    warn!(
                        key = %event.key,
                        kind = ?event.kind,
                        error = %e,
                        "Skipping malformed membership event"
                    );
                    summary.skipped += 1;
                }
            }
        }

        summary
    }

    /// Point-in-time copy of the directory, ordered by key
    pub async fn snapshot(&self) -> Vec<ReplicaInfo> {
        let replicas = self.replicas.read().await;
        let mut list: Vec<ReplicaInfo> = replicas.values().cloned().collect();
        list.sort_by(|a, b| a.address.cmp(&b.address).then(a.port.cmp(&b.port)));
        list
    }

    /// Produce an ordered candidate list for a connecting agent
    pub async fn schedule(&self) -> Result<Vec<Candidate>> {
        let mut list: Vec<ReplicaInfo> = {
            let replicas = self.replicas.read().await;
            replicas.values().cloned().collect()
        };

        if list.is_empty() {
            warn!("No replicas available for scheduling");
            return Err(GatewayError::NoResourcesAvailable(
                "replica directory is empty".into(),
            ));
        }

        list.sort_by_key(|r| r.active_session_count);

        let mid = list.len() / 2;
        let (low, high) = list.split_at_mut(mid);
        let mut rng = rand::thread_rng();
        low.shuffle(&mut rng);
        high.shuffle(&mut rng);

        let limit = if self.max_candidates == 0 {
            list.len()
        } else {
            self.max_candidates
        };

        let candidates: Vec<Candidate> =
            list.iter().take(limit).map(ReplicaInfo::candidate).collect();
        debug!(
            candidates = candidates.len(),
            first = %candidates[0],
            "Scheduled replicas"
        );
        Ok(candidates)
    }

    /// Number of known replicas
    pub async fn len(&self) -> usize {
        self.replicas.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.replicas.read().await.is_empty()
    }

    /// Sum of active sessions reported across all replicas
    pub async fn total_load(&self) -> u64 {
        self.replicas
            .read()
            .await
            .values()
            .map(|r| r.active_session_count)
            .sum()
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::EventKind;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn scheduler_with(loads: &[(&str, u64)], max: usize) -> ReplicaScheduler {
        let scheduler = ReplicaScheduler::new(max);
        let events = loads
            .iter()
            .map(|(addr, load)| MembershipEvent::put(&ReplicaInfo::new(*addr, 9510, *load)))
            .collect();
        scheduler.apply_update(events).await;
        scheduler
    }

    #[tokio::test]
    async fn test_schedule_empty_directory_fails() {
        let scheduler = ReplicaScheduler::new(3);
        for _ in 0..5 {
            let result = scheduler.schedule().await;
            assert!(matches!(result, Err(GatewayError::NoResourcesAvailable(_))));
        }
    }

    #[tokio::test]
    async fn test_schedule_load_bias_with_shuffled_tiers() {
        let scheduler =
            scheduler_with(&[("a", 0), ("b", 0), ("c", 10), ("d", 10)], 0).await;

        let low: HashSet<&str> = ["a", "b"].into_iter().collect();
        let mut first_seen = HashSet::new();
        let mut third_seen = HashSet::new();

        for _ in 0..200 {
            let candidates = scheduler.schedule().await.unwrap();
            assert_eq!(candidates.len(), 4);
            assert!(low.contains(candidates[0].address.as_str()));
            assert!(low.contains(candidates[1].address.as_str()));
            assert!(!low.contains(candidates[2].address.as_str()));
            assert!(!low.contains(candidates[3].address.as_str()));
            first_seen.insert(candidates[0].address.clone());
            third_seen.insert(candidates[2].address.clone());
        }

        // Within each tier the order varies across runs
        assert_eq!(first_seen.len(), 2);
        assert_eq!(third_seen.len(), 2);
    }

    #[tokio::test]
    async fn test_schedule_truncates_to_max_candidates() {
        let scheduler =
            scheduler_with(&[("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)], 3).await;
        let candidates = scheduler.schedule().await.unwrap();
        assert_eq!(candidates.len(), 3);

        // Low half of five is {a, b}; both lead the list
        let leading: HashSet<String> =
            candidates[..2].iter().map(|c| c.address.clone()).collect();
        assert_eq!(
            leading,
            ["a", "b"].iter().map(|s| s.to_string()).collect::<HashSet<String>>()
        );
    }

    #[tokio::test]
    async fn test_schedule_single_replica() {
        let scheduler = scheduler_with(&[("only", 42)], 3).await;
        let candidates = scheduler.schedule().await.unwrap();
        assert_eq!(candidates, vec![Candidate { address: "only".into(), port: 9510 }]);
    }

    #[tokio::test]
    async fn test_put_overwrites_and_delete_is_idempotent() {
        let scheduler = scheduler_with(&[("a", 1)], 0).await;

        let summary = scheduler
            .apply_update(vec![MembershipEvent::put(&ReplicaInfo::new("a", 9510, 8))])
            .await;
        assert_eq!(summary.applied, 1);
        let snapshot = scheduler.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].active_session_count, 8);

        let summary = scheduler
            .apply_update(vec![
                MembershipEvent::delete("a:9510"),
                MembershipEvent::delete("a:9510"),
                MembershipEvent::delete("never-seen:1"),
            ])
            .await;
        assert_eq!(summary, ApplySummary { applied: 3, skipped: 0 });
        assert!(scheduler.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_events_are_skipped() {
        let scheduler = ReplicaScheduler::new(0);
        let summary = scheduler
            .apply_update(vec![
                MembershipEvent {
                    kind: EventKind::Put,
                    key: "bad:1".into(),
                    value: b"garbage".to_vec(),
                },
                MembershipEvent::put(&ReplicaInfo::new("good", 9510, 2)),
            ])
            .await;

        assert_eq!(summary, ApplySummary { applied: 1, skipped: 1 });
        assert_eq!(scheduler.len().await, 1);
        assert_eq!(scheduler.total_load().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_schedule_and_update() {
        let scheduler = Arc::new(scheduler_with(&[("seed", 0)], 2).await);

        let mut handles = Vec::new();
        for i in 0..10u64 {
            let s = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move {
                let addr = format!("r{}", i);
                s.apply_update(vec![MembershipEvent::put(&ReplicaInfo::new(addr, 9510, i))])
                    .await;
                // The seed replica is never removed, so scheduling always succeeds
                let candidates = s.schedule().await.unwrap();
                assert!(!candidates.is_empty() && candidates.len() <= 2);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(scheduler.len().await, 11);
    }
}

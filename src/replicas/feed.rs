//! Membership feed events
//!
//! The cluster watcher delivers watch-style events: a kind, the replica's
//! `address:port` key and, for puts, the JSON-encoded `ReplicaInfo`. The feed
//! is best-effort, so a record that does not decode is reported as such and
//! the caller skips it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::scheduler::ReplicaScheduler;
use super::ReplicaInfo;
use crate::types::{GatewayError, Result};

/// Watch event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Put,
    Delete,
}

/// One raw membership event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub kind: EventKind,
    /// `address:port` of the replica
    pub key: String,
    /// JSON-encoded `ReplicaInfo` (empty for deletes)
    #[serde(default)]
    pub value: Vec<u8>,
}

/// A decoded, validated event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DirectoryChange {
    Upsert(ReplicaInfo),
    Remove(String),
}

impl MembershipEvent {
    /// Build a put event for a replica
    pub fn put(replica: &ReplicaInfo) -> Self {
        Self {
            kind: EventKind::Put,
            key: replica.key(),
            value: serde_json::to_vec(replica).unwrap_or_default(),
        }
    }

    /// Build a delete event for an `address:port` key
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Decode into a directory change, rejecting malformed records
    pub(crate) fn decode(&self) -> Result<DirectoryChange> {
        match self.kind {
            EventKind::Put => {
                let replica: ReplicaInfo = serde_json::from_slice(&self.value)?;
                replica.validate()?;
                if !self.key.is_empty() && self.key != replica.key() {
                    return Err(GatewayError::InvalidArgument(format!(
                        "event key {} does not match payload {}",
                        self.key,
                        replica.key()
                    )));
                }
                Ok(DirectoryChange::Upsert(replica))
            }
            EventKind::Delete => {
                if self.key.trim().is_empty() {
                    return Err(GatewayError::InvalidArgument(
                        "delete event without key".into(),
                    ));
                }
                Ok(DirectoryChange::Remove(self.key.trim().to_string()))
            }
        }
    }
}

/// Spawn a task applying membership batches to the scheduler in delivery order.
///
/// The task ends when the sending side of the feed is dropped.
pub fn spawn_membership_task(
    scheduler: Arc<ReplicaScheduler>,
    mut feed: mpsc::Receiver<Vec<MembershipEvent>>,
) -> tokio::task::JoinHandle<()> {
    info!("Membership feed task started");
    tokio::spawn(async move {
        while let Some(events) = feed.recv().await {
            let summary = scheduler.apply_update(events).await;
            debug!(
                applied = summary.applied,
                skipped = summary.skipped,
                "Applied membership batch"
            );
        }
        info!("Membership feed closed");
    })
}

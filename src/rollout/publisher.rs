//! Publish driver
//!
//! Runs one release notification end to end on this replica:
//!
//! 1. Snapshot the application's live sessions from the registry
//! 2. Keep the sessions the release targets (cluster, zone, labels)
//! 3. Arrange them on a fresh `RolloutController`
//! 4. Notify each batch through the `SessionNotifier`, honouring the delays
//!
//! Targets keep the registry's (datacenter, address) order, so re-running a
//! publish against the same set of agents produces the same batches.
//! Delivery failures are counted and logged; they never stop the rollout.
//! An abort takes effect between batches.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::controller::RolloutController;
use super::RolloutConfig;
use crate::sessions::{AgentSession, ReleaseNotice, SessionNotifier, SessionRegistry};
use crate::types::Result;

/// Which of an application's sessions a release is meant for.
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    pub cluster_id: Option<String>,
    pub zone_id: Option<String>,
    /// Every pair must be present on the session
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TargetSelector {
    /// Selector matching every session
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    pub fn with_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = Some(zone_id.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, session: &AgentSession) -> bool {
        if let Some(ref cluster) = self.cluster_id {
            if &session.cluster_id != cluster {
                return false;
            }
        }
        if let Some(ref zone) = self.zone_id {
            if &session.zone_id != zone {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| session.labels.get(k) == Some(v))
    }
}

/// One publish to run
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub notice: ReleaseNotice,
    pub selector: TargetSelector,
    /// Overrides the publisher's default rollout parameters
    pub rollout: Option<RolloutConfig>,
}

impl PublishRequest {
    pub fn new(notice: ReleaseNotice) -> Self {
        Self {
            notice,
            selector: TargetSelector::all(),
            rollout: None,
        }
    }

    pub fn with_selector(mut self, selector: TargetSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_rollout(mut self, rollout: RolloutConfig) -> Self {
        self.rollout = Some(rollout);
        self
    }
}

/// Flag to stop a running publish before its next batch
#[derive(Debug, Clone, Default)]
pub struct RolloutAbort(Arc<AtomicBool>);

impl RolloutAbort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RolloutReport {
    pub application_id: String,
    pub release_id: String,
    /// Sessions selected for the release
    pub targets: usize,
    /// Batches dispatched
    pub batches: usize,
    pub notified: usize,
    pub failed: usize,
    pub aborted: bool,
}

/// Drives publishes against this replica's registry
pub struct Publisher {
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn SessionNotifier>,
    defaults: RolloutConfig,
}

impl Publisher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        notifier: Arc<dyn SessionNotifier>,
        defaults: RolloutConfig,
    ) -> Self {
        Self {
            registry,
            notifier,
            defaults,
        }
    }

    /// Sessions a request would reach right now, in rollout order
    pub fn select_targets(&self, request: &PublishRequest) -> Vec<AgentSession> {
        self.registry
            .get_sessions(&request.notice.application_id)
            .into_iter()
            .filter(|session| request.selector.matches(session))
            .collect()
    }

    /// Run a staged publish to completion or until `abort` is raised
    pub async fn publish(
        &self,
        request: PublishRequest,
        abort: &RolloutAbort,
    ) -> Result<RolloutReport> {
        let config = request.rollout.clone().unwrap_or_else(|| self.defaults.clone());
        config.validate()?;

        let targets = self.select_targets(&request);
        let notice = request.notice;
        let mut report = RolloutReport {
            application_id: notice.application_id.clone(),
            release_id: notice.release_id.clone(),
            targets: targets.len(),
            ..Default::default()
        };

        info!(
            app = %notice.application_id,
            release = %notice.release_id,
            targets = targets.len(),
            steps = config.step_count,
            delay_ms = config.inter_batch_delay.as_millis() as u64,
            "Starting staged publish"
        );

        let mut controller = RolloutController::from_config(&config);
        controller.arrange(targets);

        loop {
            if abort.is_aborted() {
                report.aborted = true;
                break;
            }
            let Some(batch) = controller.next_batch().await else {
                break;
            };
            // The abort may have arrived during the inter-batch wait
            if abort.is_aborted() {
                report.aborted = true;
                break;
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|session| self.notifier.notify(session, &notice)),
            )
            .await;

            for (session, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => report.notified += 1,
                    Err(e) => {
                        warn!(
                            session = %session.identity(),
                            release = %notice.release_id,
                            error = %e,
                            "Failed to notify session"
                        );
                        report.failed += 1;
                    }
                }
            }
            report.batches += 1;

            info!(
                app = %notice.application_id,
                release = %notice.release_id,
                batch = report.batches,
                size = batch.len(),
                remaining = controller.remaining(),
                "Dispatched rollout batch"
            );
        }

        if report.aborted {
            warn!(
                app = %report.application_id,
                release = %report.release_id,
                notified = report.notified,
                "Staged publish aborted"
            );
        } else {
            info!(
                app = %report.application_id,
                release = %report.release_id,
                notified = report.notified,
                failed = report.failed,
                batches = report.batches,
                "Staged publish complete"
            );
        }

        Ok(report)
    }
}

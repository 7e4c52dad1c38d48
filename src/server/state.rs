//! Shared control-plane state and the run loop
//!
//! One `AppState` per process owns the session registry, the replica
//! scheduler and the notifier. Publishes build a fresh `Publisher` (and with
//! it a fresh rollout controller) every time.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::status::StatusReport;
use crate::config::Args;
use crate::replicas::{
    parse_replica_addr, spawn_membership_task, MembershipEvent, ReplicaInfo, ReplicaScheduler,
};
use crate::rollout::{Publisher, RolloutConfig};
use crate::sessions::{spawn_reaper_task, ChannelNotifier, SessionRegistry};
use crate::types::{GatewayError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<ReplicaScheduler>,
    pub notifier: Arc<ChannelNotifier>,
    /// Defaults for publishes that do not override them
    pub rollout: RolloutConfig,
    started_at: Instant,
}

impl AppState {
    /// Build state from validated arguments
    pub fn new(args: Args) -> Self {
        let (min_ttl, max_ttl) = args.session_ttl_bounds();
        let registry = Arc::new(SessionRegistry::with_ttl_bounds(min_ttl, max_ttl));
        let scheduler = Arc::new(ReplicaScheduler::new(args.scheduler_max_candidates));
        let notifier = Arc::new(ChannelNotifier::new(args.notify_buffer));
        let rollout = args.rollout_config();

        Self {
            args,
            registry,
            scheduler,
            notifier,
            rollout,
            started_at: Instant::now(),
        }
    }

    /// Publisher over this replica's sessions
    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            Arc::clone(&self.registry),
            self.notifier.clone(),
            self.rollout.clone(),
        )
    }

    /// Put events for the replicas named on the command line
    pub fn seed_events(&self) -> Result<Vec<MembershipEvent>> {
        self.args
            .replica_seed_list()
            .iter()
            .map(|addr| {
                let (address, port) = parse_replica_addr(addr)?;
                Ok(MembershipEvent::put(&ReplicaInfo::new(address, port, 0)))
            })
            .collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Current load and version information
    pub async fn status(&self) -> StatusReport {
        StatusReport::collect(self).await
    }
}

/// Run the control plane until ctrl-c.
///
/// `feed` carries membership batches from the cluster watcher.
pub async fn run(
    state: Arc<AppState>,
    feed: mpsc::Receiver<Vec<MembershipEvent>>,
) -> Result<()> {
    info!("Control plane node {} starting", state.args.node_id);

    let mut tasks = vec![spawn_membership_task(Arc::clone(&state.scheduler), feed)];

    tasks.extend(spawn_reaper_task(
        Arc::clone(&state.registry),
        Duration::from_secs(state.args.reaper_interval_secs),
    ));

    if state.args.stats_interval_secs > 0 {
        tasks.push(spawn_stats_task(
            Arc::clone(&state),
            Duration::from_secs(state.args.stats_interval_secs),
        ));
    }

    info!(
        "Rollout defaults: {} steps, min batch {}, delay {:?}",
        state.rollout.step_count, state.rollout.min_batch_size, state.rollout.inter_batch_delay
    );
    info!("Control plane ready");

    let result = tokio::signal::ctrl_c()
        .await
        .map_err(|e| GatewayError::Internal(format!("Failed to listen for ctrl-c: {}", e)));

    info!("Shutting down control plane");
    for task in tasks {
        task.abort();
    }

    result
}

/// Spawn a task that periodically logs the status report
fn spawn_stats_task(state: Arc<AppState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = state.status().await;
            info!(
                sessions = report.live_sessions,
                applications = report.applications,
                channels = report.open_channels,
                replicas = report.replicas.len(),
                replica_load = report.total_replica_load,
                "Control plane status"
            );
            if let Ok(json) = serde_json::to_string(&report) {
                debug!("Status report: {}", json);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn state_with(extra: &[&str]) -> AppState {
        let mut argv = vec!["confgate"];
        argv.extend_from_slice(extra);
        AppState::new(Args::parse_from(argv))
    }

    #[test]
    fn test_seed_events_from_args() {
        let state = state_with(&["--replicas", "10.0.0.1:9510,10.0.0.2:9511"]);
        let events = state.seed_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].key, "10.0.0.2:9511");
    }

    #[test]
    fn test_seed_events_rejects_bad_entry() {
        let state = state_with(&["--replicas", "nonsense"]);
        assert!(state.seed_events().is_err());
    }

    #[test]
    fn test_state_uses_configured_rollout() {
        let state = state_with(&["--rollout-steps", "7", "--rollout-delay-ms", "250"]);
        assert_eq!(state.rollout.step_count, 7);
        assert_eq!(state.rollout.inter_batch_delay, Duration::from_millis(250));
        assert_eq!(state.scheduler.max_candidates(), 3);
    }
}

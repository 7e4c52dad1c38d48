//! Status reporting
//!
//! Polled by the external metrics exporter; nothing is pushed from here.

use serde::Serialize;

use super::state::AppState;
use crate::replicas::ReplicaInfo;

/// Point-in-time view of this replica's control-plane load
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub node_id: String,
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub uptime_secs: u64,
    /// Un-expired sessions across all applications
    pub live_sessions: usize,
    pub applications: usize,
    pub open_channels: usize,
    /// Replica directory snapshot with per-replica load
    pub replicas: Vec<ReplicaInfo>,
    pub total_replica_load: u64,
}

impl StatusReport {
    pub(crate) async fn collect(state: &AppState) -> Self {
        let stats = state.registry.stats();
        let replicas = state.scheduler.snapshot().await;
        let total_replica_load = replicas.iter().map(|r| r.active_session_count).sum();

        Self {
            node_id: state.args.node_id.to_string(),
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            uptime_secs: state.uptime().as_secs(),
            live_sessions: stats.sessions,
            applications: stats.applications,
            open_channels: state.notifier.open_count(),
            replicas,
            total_replica_load,
        }
    }
}

//! Session registry
//!
//! Two-level store: application id -> bucket, bucket = (datacenter, address)
//! -> session. Both levels are sharded `DashMap`s so heartbeats for unrelated
//! applications rarely contend.
//!
//! ## Expiry
//!
//! Expiry is checked on read: `get_sessions` and `live_session_count` never
//! report an entry whose deadline has passed. The optional reaper task only
//! reclaims memory (expired entries and empty buckets).
//!
//! ## Bucket reclamation
//!
//! A flush inserts into its bucket while holding the outer map entry, and the
//! reaper removes empty buckets under that same entry lock, so a concurrent
//! flush can never land in a bucket that has just been dropped.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{AgentSession, ChannelId, Heartbeat, SessionIdentity, SessionKey};
use crate::types::{GatewayError, Result};

/// Default lower bound on a heartbeat's declared TTL (declared deadlines are honoured)
const DEFAULT_MIN_TTL: Duration = Duration::ZERO;

/// Default upper bound on a heartbeat's declared TTL
const DEFAULT_MAX_TTL: Duration = Duration::from_secs(60 * 60);

/// Stored session with its deadline
#[derive(Debug, Clone)]
struct SessionEntry {
    session: AgentSession,
    expires_at: Instant,
}

impl SessionEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Sessions of one application
#[derive(Debug, Default)]
struct AppBucket {
    sessions: DashMap<SessionKey, SessionEntry>,
}

/// Registry of live agent sessions
pub struct SessionRegistry {
    /// application_id -> bucket
    apps: DashMap<String, Arc<AppBucket>>,
    min_ttl: Duration,
    max_ttl: Duration,
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Applications with a bucket (may include buckets awaiting reclamation)
    pub applications: usize,
    /// Un-expired sessions across all applications
    pub sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry with default TTL bounds
    pub fn new() -> Self {
        Self::with_ttl_bounds(DEFAULT_MIN_TTL, DEFAULT_MAX_TTL)
    }

    /// Create an empty registry clamping heartbeat TTLs into `[min_ttl, max_ttl]`
    pub fn with_ttl_bounds(min_ttl: Duration, max_ttl: Duration) -> Self {
        Self {
            apps: DashMap::new(),
            min_ttl,
            max_ttl: max_ttl.max(min_ttl),
        }
    }

    /// Insert or refresh the session named by `heartbeat`, re-arming its TTL
    pub fn flush_session(&self, heartbeat: Heartbeat, channel: ChannelId) -> Result<()> {
        heartbeat.validate()?;
        if channel.is_nil() {
            return Err(GatewayError::InvalidArgument(format!(
                "heartbeat from {} has no notification channel",
                heartbeat.address
            )));
        }

        let ttl = heartbeat.ttl.clamp(self.min_ttl, self.max_ttl);
        let now = Instant::now();
        let key = heartbeat.identity().key();
        let app_id = heartbeat.application_id.clone();
        let entry = SessionEntry {
            session: AgentSession::from_heartbeat(heartbeat, channel),
            expires_at: now + ttl,
        };

        // Hold the outer entry while inserting so the reaper cannot drop the bucket
        let bucket = self.apps.entry(app_id.clone()).or_default();
        let previous = bucket.sessions.insert(key.clone(), entry);
        drop(bucket);

        match previous {
            Some(prev) if prev.is_live(now) => {
                debug!(
                    app = %app_id,
                    datacenter = %key.datacenter,
                    address = %key.address,
                    ttl_ms = ttl.as_millis() as u64,
                    "Session refreshed"
                );
            }
            _ => {
                info!(
                    app = %app_id,
                    datacenter = %key.datacenter,
                    address = %key.address,
                    channel = %channel,
                    "Session registered"
                );
            }
        }

        Ok(())
    }

    /// Snapshot of un-expired sessions for an application, ordered by (datacenter, address)
    pub fn get_sessions(&self, application_id: &str) -> Vec<AgentSession> {
        let Some(bucket) = self.bucket(application_id) else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut live: Vec<(SessionKey, AgentSession)> = bucket
            .sessions
            .iter()
            .filter(|entry| entry.is_live(now))
            .map(|entry| (entry.key().clone(), entry.session.clone()))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));

        live.into_iter().map(|(_, session)| session).collect()
    }

    /// Remove a session; absent sessions are not an error
    pub fn delete_session(&self, identity: &SessionIdentity) -> Result<()> {
        identity.validate()?;

        if let Some(bucket) = self.bucket(&identity.application_id) {
            if bucket.sessions.remove(&identity.key()).is_some() {
                info!(session = %identity, "Session removed");
            }
        }
        Ok(())
    }

    /// Remove a session only if it still belongs to `channel`.
    ///
    /// An agent that reconnects flushes under a new channel before its old
    /// stream is torn down; the old stream's teardown must not remove the
    /// new session. Returns whether an entry was removed.
    pub fn delete_session_for_channel(
        &self,
        identity: &SessionIdentity,
        channel: ChannelId,
    ) -> Result<bool> {
        identity.validate()?;

        let Some(bucket) = self.bucket(&identity.application_id) else {
            return Ok(false);
        };
        let removed = bucket
            .sessions
            .remove_if(&identity.key(), |_, entry| entry.session.channel == channel)
            .is_some();
        if removed {
            info!(session = %identity, channel = %channel, "Session removed on disconnect");
        }
        Ok(removed)
    }

    /// Number of un-expired sessions across all applications.
    ///
    /// Not a consistent cut across buckets; good enough for load reporting.
    pub fn live_session_count(&self) -> usize {
        let now = Instant::now();
        self.buckets()
            .iter()
            .map(|bucket| bucket.sessions.iter().filter(|e| e.is_live(now)).count())
            .sum()
    }

    /// Number of application buckets
    pub fn application_count(&self) -> usize {
        self.apps.len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            applications: self.application_count(),
            sessions: self.live_session_count(),
        }
    }

    /// Drop expired entries and empty buckets. Returns the number of sessions removed.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for bucket in self.buckets() {
            let before = bucket.sessions.len();
            bucket.sessions.retain(|_, entry| entry.is_live(now));
            removed += before.saturating_sub(bucket.sessions.len());
        }

        self.apps.retain(|_, bucket| !bucket.sessions.is_empty());

        removed
    }

    fn bucket(&self, application_id: &str) -> Option<Arc<AppBucket>> {
        self.apps.get(application_id).map(|b| Arc::clone(b.value()))
    }

    fn buckets(&self) -> Vec<Arc<AppBucket>> {
        self.apps.iter().map(|b| Arc::clone(b.value())).collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that periodically reaps expired sessions.
///
/// A zero interval disables the reaper and returns `None`; expiry is still
/// enforced on read.
pub fn spawn_reaper_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        info!("Session reaper disabled; expiry is checked on read only");
        return None;
    }
    info!("Session reaper started (interval: {:?})", interval);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.reap();
            if removed > 0 {
                debug!("Session reaper: removed {} expired sessions", removed);
            }
            let stats = registry.stats();
            debug!(
                "Session stats: {} live sessions in {} applications",
                stats.sessions, stats.applications
            );
        }
    }))
}

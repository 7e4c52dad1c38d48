//! Agent sessions
//!
//! Every sidecar holds one long-lived stream against a replica and pings it
//! periodically. The registry records one session per
//! (application, datacenter, address) and forgets it when the agent
//! disconnects or stops pinging for longer than its declared TTL.
//!
//! The registry never holds a transport primitive. Sessions carry a
//! `ChannelId`; delivering a release notice goes through a `SessionNotifier`.

pub mod notifier;
pub mod registry;

pub use notifier::{ChannelNotifier, ReleaseNotice, SessionNotifier};
pub use registry::{spawn_reaper_task, RegistryStats, SessionRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::types::{GatewayError, Result};

/// Handle naming the notification channel of one agent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Allocate a fresh channel id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The "no channel" id; rejected by the registry
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded agent ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub application_id: String,
    pub business_id: String,
    pub cluster_id: String,
    pub zone_id: String,
    pub datacenter: String,
    pub address: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// How long the session stays live without another ping
    pub ttl: Duration,
}

impl Heartbeat {
    /// Minimal heartbeat with empty metadata
    pub fn new(
        application_id: impl Into<String>,
        datacenter: impl Into<String>,
        address: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            business_id: String::new(),
            cluster_id: String::new(),
            zone_id: String::new(),
            datacenter: datacenter.into(),
            address: address.into(),
            labels: BTreeMap::new(),
            ttl,
        }
    }

    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    pub fn with_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = zone_id.into();
        self
    }

    pub fn with_business(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = business_id.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Identity of the session this heartbeat refreshes
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            application_id: self.application_id.clone(),
            datacenter: self.datacenter.clone(),
            address: self.address.clone(),
        }
    }

    /// Check the fields every heartbeat must carry
    pub fn validate(&self) -> Result<()> {
        self.identity().validate()?;
        if self.ttl.is_zero() {
            return Err(GatewayError::InvalidArgument(format!(
                "heartbeat from {} declares a zero ttl",
                self.address
            )));
        }
        Ok(())
    }
}

/// Fully qualified session identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub application_id: String,
    pub datacenter: String,
    pub address: String,
}

impl SessionIdentity {
    pub fn new(
        application_id: impl Into<String>,
        datacenter: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            datacenter: datacenter.into(),
            address: address.into(),
        }
    }

    /// Every part must be non-empty with no surrounding whitespace
    pub fn validate(&self) -> Result<()> {
        check_part("application_id", &self.application_id)?;
        check_part("datacenter", &self.datacenter)?;
        check_part("address", &self.address)
    }

    /// Key within the application's bucket
    pub(crate) fn key(&self) -> SessionKey {
        SessionKey {
            datacenter: self.datacenter.clone(),
            address: self.address.clone(),
        }
    }
}

fn check_part(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidArgument(format!("{} is empty", name)));
    }
    if value.trim() != value {
        return Err(GatewayError::InvalidArgument(format!(
            "{} '{}' has surrounding whitespace",
            name, value
        )));
    }
    Ok(())
}

impl std::fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.application_id, self.datacenter, self.address)
    }
}

/// Key of a session inside one application bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SessionKey {
    pub datacenter: String,
    pub address: String,
}

/// One live agent, as returned by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub application_id: String,
    pub business_id: String,
    pub cluster_id: String,
    pub zone_id: String,
    pub datacenter: String,
    pub address: String,
    pub labels: BTreeMap<String, String>,
    /// Where release notices for this agent are delivered
    pub channel: ChannelId,
    /// When the most recent heartbeat was recorded
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentSession {
    pub(crate) fn from_heartbeat(heartbeat: Heartbeat, channel: ChannelId) -> Self {
        Self {
            application_id: heartbeat.application_id,
            business_id: heartbeat.business_id,
            cluster_id: heartbeat.cluster_id,
            zone_id: heartbeat.zone_id,
            datacenter: heartbeat.datacenter,
            address: heartbeat.address,
            labels: heartbeat.labels,
            channel,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(&self.application_id, &self.datacenter, &self.address)
    }
}

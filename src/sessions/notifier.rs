//! Release notice delivery
//!
//! The registry only knows a session's `ChannelId`. Whoever owns the agent
//! connection opens a channel here, keeps the receiving half, and closes the
//! channel on teardown. Rollouts deliver through the `SessionNotifier` trait so
//! the transport can be swapped without touching registry lifetimes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AgentSession, ChannelId};
use crate::types::{GatewayError, Result};

/// Notice that a new release is available for an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseNotice {
    pub application_id: String,
    pub release_id: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
}

impl ReleaseNotice {
    pub fn new(
        application_id: impl Into<String>,
        release_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            release_id: release_id.into(),
            version: version.into(),
            published_at: Utc::now(),
        }
    }
}

/// Delivers release notices to agent sessions
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    /// Hand `notice` to the session's connection. Must not block on a slow agent.
    async fn notify(&self, session: &AgentSession, notice: &ReleaseNotice) -> Result<()>;
}

/// In-process notifier backed by one bounded mpsc channel per agent connection
pub struct ChannelNotifier {
    channels: DashMap<ChannelId, mpsc::Sender<ReleaseNotice>>,
    buffer: usize,
}

impl ChannelNotifier {
    /// Create a notifier whose channels buffer up to `buffer` notices
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Open a channel for a new agent connection; the caller is the sole reader
    pub fn open_channel(&self) -> (ChannelId, mpsc::Receiver<ReleaseNotice>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ChannelId::new();
        self.channels.insert(id, tx);
        debug!(channel = %id, "Notification channel opened");
        (id, rx)
    }

    /// Close a channel. Notices already queued stay readable by the receiver.
    pub fn close_channel(&self, id: ChannelId) {
        if self.channels.remove(&id).is_some() {
            debug!(channel = %id, "Notification channel closed");
        }
    }

    /// Number of open channels
    pub fn open_count(&self) -> usize {
        self.channels.len()
    }

    fn sender(&self, id: ChannelId) -> Option<mpsc::Sender<ReleaseNotice>> {
        self.channels.get(&id).map(|tx| tx.value().clone())
    }
}

#[async_trait]
impl SessionNotifier for ChannelNotifier {
    async fn notify(&self, session: &AgentSession, notice: &ReleaseNotice) -> Result<()> {
        let Some(tx) = self.sender(session.channel) else {
            return Err(GatewayError::ChannelClosed(session.identity().to_string()));
        };

        match tx.try_send(notice.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    session = %session.identity(),
                    release = %notice.release_id,
                    "Notification channel full, notice dropped"
                );
                Err(GatewayError::ChannelFull(session.identity().to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Receiver went away without a close; forget the sender
                self.close_channel(session.channel);
                Err(GatewayError::ChannelClosed(session.identity().to_string()))
            }
        }
    }
}
